//! The Git Worktree Driver.
//!
//! Idempotent clone/fetch/reset/checkout/orphan-branch/commit/push primitives,
//! with recovery for stale rebases and dubious ownership. This is the only
//! part of the agent that mutates a git working tree; every other component
//! treats working trees as read-only and asks the driver to reconcile them.

mod error;
mod ownership;

pub use error::GitError;

use std::path::Path;
use std::process::Command;

/// Outcome of a single `update_repo` call.
///
/// `ok` tracks whether the dispatch step (orphan-creation or pin-to-hash)
/// succeeded; `status_text`/`latest_commit` are collected regardless, since
/// a failed dispatch still leaves the working tree in some observable state.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub ok: bool,
    pub status_text: String,
    pub latest_commit: String,
}

/// Drives one git working tree through the agent's reconciliation primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitDriver;

impl GitDriver {
    pub fn new() -> Self {
        Self
    }

    /// Reconcile `local_path` to track `url`/`branch` (or pin to `checkout_hash`).
    ///
    /// See the module-level docs and `SPEC_FULL.md` §4.1 for the exact
    /// dispatch rules. Clone, ownership-reclaim, and fetch/reset failures are
    /// fatal (`Err`); failures inside the dispatch step are captured into
    /// `UpdateOutcome::ok` instead of aborting the call.
    #[allow(clippy::too_many_arguments)]
    pub fn update_repo(
        &self,
        name: &str,
        url: &str,
        branch: &str,
        committer: &str,
        local_path: &Path,
        checkout_hash: Option<&str>,
        create_branch: bool,
    ) -> Result<UpdateOutcome, GitError> {
        let url = strip_branch_suffix(url, branch);

        log::info!("Updating repository {name}...");

        if !local_path.exists() {
            clone(&url, local_path)?;
        } else {
            ownership::reclaim(local_path)?;
            abort_stale_rebase(local_path);
        }

        fetch_all(local_path)?;
        reset_hard(local_path, "HEAD")?;

        let ok = if create_branch && !branch.is_empty() && !branch_exists(local_path, branch) {
            create_orphan_branch(local_path, branch, committer).is_ok()
        } else {
            let target = match checkout_hash {
                Some(hash) => hash.to_string(),
                None => format!("origin/{branch}"),
            };
            pin_to(local_path, &target).is_ok()
        };

        let (status_text, latest_commit) = self.status(local_path)?;
        Ok(UpdateOutcome {
            ok,
            status_text,
            latest_commit,
        })
    }

    /// Return `git status` verbatim and a one-line `git log` of HEAD.
    pub fn status(&self, local_path: &Path) -> Result<(String, String), GitError> {
        let status_text = run_capture(local_path, &["status"])?;
        let latest_commit = run_capture(
            local_path,
            &["log", "-1", "--pretty=format:%h - %s (%an, %ad)"],
        )
        .unwrap_or_default();
        Ok((status_text, latest_commit))
    }

    /// Commit and push any local changes to `branch`; returns whether a push happened.
    pub fn publish(&self, local_path: &Path, branch: &str, committer: &str) -> Result<bool, GitError> {
        if is_dirty(local_path)? {
            run(local_path, &["add", "-A"])?;
            run(local_path, &["config", "user.name", committer])?;
            run(local_path, &["config", "user.email", "<>"])?;
            run(local_path, &["commit", "-m", "Updated status"])?;
        }

        let local_head = run_capture(local_path, &["rev-parse", "HEAD"])?;
        let remote_head = run_capture(local_path, &["rev-parse", &format!("origin/{branch}")]).ok();

        if remote_head.as_deref() != Some(local_head.as_str()) {
            run(local_path, &["push", "--set-upstream", "origin", branch])?;
            log::info!("Pushed status to branch {branch}");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn strip_branch_suffix(url: &str, branch: &str) -> String {
    let suffix = format!("@{branch}");
    url.strip_suffix(&suffix).unwrap_or(url).to_string()
}

fn clone(url: &str, local_path: &Path) -> Result<(), GitError> {
    let parent = local_path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| GitError::CommandFailed(format!("failed to create {}: {e}", parent.display())))?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", url]).arg(local_path);
    let output = cmd
        .output()
        .map_err(|e| GitError::CommandFailed(format!("failed to spawn git clone: {e}")))?;
    if !output.status.success() {
        return Err(GitError::CommandFailed(format!(
            "git clone {url} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn abort_stale_rebase(local_path: &Path) {
    let status_text = run_capture(local_path, &["status"]).unwrap_or_default();
    if status_text.contains("rebas") {
        log::warn!("Detected stale rebase in {}, aborting", local_path.display());
        if let Err(e) = run(local_path, &["rebase", "--abort"]) {
            log::warn!("rebase --abort failed: {e}");
        }
    }
}

fn fetch_all(local_path: &Path) -> Result<(), GitError> {
    run(local_path, &["fetch", "--all", "--prune"])
}

fn reset_hard(local_path: &Path, target: &str) -> Result<(), GitError> {
    run(local_path, &["reset", "--hard", target])
}

/// Whether any ref — local or the remote-tracking ref fetch just populated —
/// already matches `branch`. Checking only `refs/heads/<branch>` would miss
/// a branch that exists at the remote but hasn't been checked out locally
/// yet (e.g. a fresh worktree on a second host sharing one monitoring
/// branch), wrongly sending it down the orphan-creation path instead of
/// pinning to the branch that already exists upstream.
fn branch_exists(local_path: &Path, branch: &str) -> bool {
    run_ok(
        local_path,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    ) || run_ok(
        local_path,
        &["rev-parse", "--verify", "--quiet", &format!("refs/remotes/origin/{branch}")],
    )
}

fn create_orphan_branch(local_path: &Path, branch: &str, committer: &str) -> Result<(), GitError> {
    run(local_path, &["checkout", "--orphan", branch])?;

    let tracked = run_capture(local_path, &["ls-files"]).unwrap_or_default();
    if !tracked.trim().is_empty() {
        run(local_path, &["rm", "-rf", "."])?;
    }

    run(local_path, &["config", "user.name", committer])?;
    run(local_path, &["config", "user.email", "<>"])?;
    run(local_path, &["commit", "--allow-empty", "-m", "Initial commit"])?;
    Ok(())
}

fn pin_to(local_path: &Path, target: &str) -> Result<(), GitError> {
    reset_hard(local_path, target)?;
    let branch = target.strip_prefix("origin/").unwrap_or(target);
    run(local_path, &["checkout", branch])
}

fn is_dirty(local_path: &Path) -> Result<bool, GitError> {
    let output = run_capture(local_path, &["status", "--porcelain"])?;
    Ok(!output.trim().is_empty())
}

fn run(local_path: &Path, args: &[&str]) -> Result<(), GitError> {
    run_capture(local_path, args).map(|_| ())
}

fn run_capture(local_path: &Path, args: &[&str]) -> Result<String, GitError> {
    log::debug!("$ git {} [{}]", args.join(" "), local_path.display());

    let output = Command::new("git")
        .args(args)
        .current_dir(local_path)
        .output()
        .map_err(|e| GitError::CommandFailed(format!("failed to spawn git {}: {e}", args.join(" "))))?;

    if !output.status.success() {
        return Err(GitError::CommandFailed(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_ok(local_path: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(local_path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
