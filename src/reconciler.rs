//! The Reconciler (C5): per-app state machine tying the rest of the
//! components together.
//!
//! One `Reconciler` instance lives for the whole process; it retains the
//! previous tick's resolved `AppPlan` per app so `plan_changed` has
//! something to compare against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;

use crate::command;
use crate::diff;
use crate::git::GitDriver;
use crate::infra_meta::{self, AppPlan, ConfigResolverError};
use crate::status::{AppFeedback, CommandStats, GitStats};

const NOT_CHECKED: &str = "Not checked for updates";
const NA: &str = "NA";

/// Drives one app through `pull_config → decide → pull_app/check_app`.
pub struct Reconciler {
    state_root: PathBuf,
    infra_name: String,
    driver: GitDriver,
    prev_plans: HashMap<String, Option<AppPlan>>,
}

impl Reconciler {
    pub fn new(state_root: PathBuf, infra_name: String) -> Self {
        Self {
            state_root,
            infra_name,
            driver: GitDriver::new(),
            prev_plans: HashMap::new(),
        }
    }

    fn config_local_path(&self, app_name: &str) -> PathBuf {
        self.state_root.join("app-configs").join(app_name)
    }

    /// Run one reconciliation tick for `app_name`, whose config repo is
    /// declared as `config_url` (`<url>[@<branch>]` shorthand).
    ///
    /// Returns `Err` only for `MissingInfraMeta`/`InvalidInfraMeta`/
    /// `AppNotFound` — per the error taxonomy these are fatal for this
    /// app's tick and the caller skips publishing status this time around.
    pub fn reconcile(&mut self, app_name: &str, config_url: &str) -> Result<AppFeedback, ConfigResolverError> {
        let (cfg_url, cfg_branch) = infra_meta::parse_url(config_url);
        let config_path = self.config_local_path(app_name);

        let prev_plan = self.prev_plans.get(app_name).cloned().flatten();

        let (config_stats, next_plan, config_pull_failed) = match self.driver.update_repo(
            app_name,
            &cfg_url,
            &cfg_branch,
            &self.infra_name,
            &config_path,
            None,
            false,
        ) {
            Ok(outcome) => {
                let plan = infra_meta::resolve(app_name, &self.infra_name, &config_path)?;
                (
                    GitStats {
                        updation_return_value: outcome.ok,
                        git_status: outcome.status_text,
                        git_repo_latest_commit: outcome.latest_commit,
                    },
                    plan,
                    false,
                )
            }
            Err(e) => {
                log::warn!("pull_config failed for {app_name}: {e}; falling back to check_app with last known plan");
                (
                    GitStats {
                        updation_return_value: false,
                        git_status: e.to_string(),
                        git_repo_latest_commit: String::new(),
                    },
                    prev_plan.clone(),
                    true,
                )
            }
        };

        // A failed pull_config must flow straight to check_app (or the
        // no-plan-yet sentinel), never through update_required/pull_app:
        // the config step itself didn't succeed this tick, so there is no
        // fresh declaration to act on.
        let (app_stats, command_stats) = match &next_plan {
            None => (
                GitStats {
                    updation_return_value: true,
                    git_status: NOT_CHECKED.to_string(),
                    git_repo_latest_commit: NA.to_string(),
                },
                CommandStats::nothing_was_run(),
            ),
            Some(plan) if config_pull_failed => self
                .check_app(plan)
                .map_err(|e| ConfigResolverError::InvalidInfraMeta(e.to_string()))?,
            Some(plan) => {
                let code_exists = plan.code_local_path.exists();
                let update_required = diff::plan_changed(prev_plan.as_ref(), Some(plan))
                    || !code_exists
                    || !diff::head_matches(&plan.code_local_path, &plan.code_commit_hash)
                    || !diff::files_equivalent(
                        plan.config_dst_path_abs.as_deref(),
                        plan.config_src_path_abs.as_deref(),
                    );

                if update_required {
                    self.pull_app(app_name, plan, code_exists)
                        .with_context(|| format!("pull_app failed for {app_name}"))
                        .map_err(|e| ConfigResolverError::InvalidInfraMeta(e.to_string()))?
                } else {
                    self.check_app(plan)
                        .map_err(|e| ConfigResolverError::InvalidInfraMeta(e.to_string()))?
                }
            }
        };

        self.prev_plans.insert(app_name.to_string(), next_plan);

        Ok(AppFeedback {
            config_updation: config_stats,
            app_updation: app_stats,
            extra_command_output: command_stats,
        })
    }

    fn pull_app(&self, app_name: &str, plan: &AppPlan, code_exists: bool) -> Result<(GitStats, CommandStats)> {
        let mut runs: IndexMap<&'static str, (i32, String)> = IndexMap::new();

        if let Some(pre) = &plan.pre_updation_command
            && code_exists
        {
            let (code, out) = command::run(pre, &plan.code_local_path)?;
            runs.insert("pre", (code, out));
        }

        let outcome = match self.driver.update_repo(
            app_name,
            &plan.code_url,
            "",
            &self.infra_name,
            &plan.code_local_path,
            Some(&plan.code_commit_hash),
            false,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                // CloneFailed/FetchFailed/OwnershipReclaimFailed: fatal for
                // this app's code-tree step, but not for the tick — capture
                // it into the feedback record the same way a pull_config
                // failure is, instead of letting it escape `reconcile` and
                // skip publishing entirely.
                log::warn!("pull_app git update failed for {app_name}: {e}");
                return Ok((
                    GitStats {
                        updation_return_value: false,
                        git_status: e.to_string(),
                        git_repo_latest_commit: String::new(),
                    },
                    command_stats_from(runs),
                ));
            }
        };

        if let (Some(src), Some(dst)) = (&plan.config_src_path_abs, &plan.config_dst_path_abs) {
            copy_with_metadata(src, dst)
                .with_context(|| format!("failed to copy config file for {app_name}"))?;
        }

        if let Some(post) = &plan.post_updation_command {
            let (code, out) = command::run(post, &plan.code_local_path)?;
            runs.insert("post", (code, out));
        }

        let app_stats = GitStats {
            updation_return_value: outcome.ok,
            git_status: outcome.status_text,
            git_repo_latest_commit: outcome.latest_commit,
        };
        Ok((app_stats, command_stats_from(runs)))
    }

    fn check_app(&self, plan: &AppPlan) -> Result<(GitStats, CommandStats)> {
        let (status_text, latest_commit) = self
            .driver
            .status(&plan.code_local_path)
            .with_context(|| format!("failed to read status of {}", plan.code_local_path.display()))?;
        Ok((
            GitStats {
                updation_return_value: true,
                git_status: status_text,
                git_repo_latest_commit: latest_commit,
            },
            CommandStats::nothing_was_run(),
        ))
    }
}

fn command_stats_from(runs: IndexMap<&'static str, (i32, String)>) -> CommandStats {
    if runs.is_empty() {
        return CommandStats::nothing_was_run();
    }

    let command_return_val = runs
        .iter()
        .map(|(k, (code, _))| format!("{k}={code}"))
        .collect::<Vec<_>>()
        .join(", ");
    let command_run_logs = runs
        .iter()
        .map(|(k, (_, out))| format!("# {k}\n{out}"))
        .collect::<Vec<_>>()
        .join("\n");

    CommandStats {
        command_return_val,
        command_run_logs,
    }
}

fn copy_with_metadata(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("git available in test environment");
        assert!(status.success(), "git {args:?} failed in {}", dir.display());
    }

    fn init_bare(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--bare", "-q"]);
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    }

    fn seed_config_repo(bare: &Path, infra_name: &str, meta_toml: &str) {
        let scratch = tempfile::tempdir().unwrap();
        git(scratch.path(), &["clone", "-q", bare.to_str().unwrap(), "."]);
        git(scratch.path(), &["config", "user.email", "test@example.com"]);
        git(scratch.path(), &["config", "user.name", "test"]);
        std::fs::create_dir_all(scratch.path().join(infra_name)).unwrap();
        std::fs::write(
            scratch.path().join(infra_name).join("infra_meta.toml"),
            meta_toml,
        )
        .unwrap();
        git(scratch.path(), &["add", "-A"]);
        git(scratch.path(), &["commit", "-q", "-m", "seed"]);
        git(scratch.path(), &["push", "-q", "origin", "HEAD:refs/heads/main"]);
    }

    fn seed_code_repo(bare: &Path) -> String {
        let scratch = tempfile::tempdir().unwrap();
        git(scratch.path(), &["clone", "-q", bare.to_str().unwrap(), "."]);
        git(scratch.path(), &["config", "user.email", "test@example.com"]);
        git(scratch.path(), &["config", "user.name", "test"]);
        std::fs::write(scratch.path().join("app.txt"), "v1").unwrap();
        git(scratch.path(), &["add", "-A"]);
        git(scratch.path(), &["commit", "-q", "-m", "v1"]);
        git(scratch.path(), &["push", "-q", "origin", "HEAD:refs/heads/main"]);
        let out = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(scratch.path())
            .output()
            .unwrap();
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn test_reconcile_first_tick_pulls_code_and_checks_out_hash() {
        let root = tempfile::tempdir().unwrap();
        let config_bare = root.path().join("config.git");
        let code_bare = root.path().join("code.git");
        init_bare(&config_bare);
        init_bare(&code_bare);

        let hash = seed_code_repo(&code_bare);
        let code_local_path = root.path().join("deployed-app");

        seed_config_repo(
            &config_bare,
            "host-01",
            &format!(
                r#"
[web]
code_url = "{}"
code_commit_hash = "{hash}"
code_local_path = "{}"
"#,
                code_bare.display(),
                code_local_path.display()
            ),
        );

        let state_root = root.path().join("state");
        let mut reconciler = Reconciler::new(state_root, "host-01".to_string());
        let feedback = reconciler
            .reconcile("web", &config_bare.display().to_string())
            .unwrap();

        assert!(feedback.app_updation.updation_return_value);
        assert!(code_local_path.join("app.txt").exists());
        assert_eq!(feedback.extra_command_output.command_run_logs, "Nothing was run");
    }

    #[test]
    fn test_reconcile_second_tick_is_check_only() {
        let root = tempfile::tempdir().unwrap();
        let config_bare = root.path().join("config.git");
        let code_bare = root.path().join("code.git");
        init_bare(&config_bare);
        init_bare(&code_bare);

        let hash = seed_code_repo(&code_bare);
        let code_local_path = root.path().join("deployed-app");

        seed_config_repo(
            &config_bare,
            "host-01",
            &format!(
                r#"
[web]
code_url = "{}"
code_commit_hash = "{hash}"
code_local_path = "{}"
"#,
                code_bare.display(),
                code_local_path.display()
            ),
        );

        let state_root = root.path().join("state");
        let mut reconciler = Reconciler::new(state_root, "host-01".to_string());
        reconciler
            .reconcile("web", &config_bare.display().to_string())
            .unwrap();
        let before = std::fs::metadata(code_local_path.join("app.txt")).unwrap().modified().unwrap();

        let feedback = reconciler
            .reconcile("web", &config_bare.display().to_string())
            .unwrap();
        let after = std::fs::metadata(code_local_path.join("app.txt")).unwrap().modified().unwrap();

        assert_eq!(before, after);
        assert!(feedback.app_updation.updation_return_value);
    }

    #[test]
    fn test_reconcile_code_tree_failure_is_captured_not_propagated() {
        let root = tempfile::tempdir().unwrap();
        let config_bare = root.path().join("config.git");
        init_bare(&config_bare);

        // An unreachable code_url: clone will fail inside pull_app.
        let bogus_code_url = root.path().join("nonexistent-code.git");
        let code_local_path = root.path().join("deployed-app");

        seed_config_repo(
            &config_bare,
            "host-01",
            &format!(
                r#"
[web]
code_url = "{}"
code_commit_hash = "abc123"
code_local_path = "{}"
"#,
                bogus_code_url.display(),
                code_local_path.display()
            ),
        );

        let state_root = root.path().join("state");
        let mut reconciler = Reconciler::new(state_root, "host-01".to_string());
        let feedback = reconciler
            .reconcile("web", &config_bare.display().to_string())
            .expect("a code-tree clone failure must be captured, not propagated out of reconcile");

        assert!(feedback.config_updation.updation_return_value);
        assert!(!feedback.app_updation.updation_return_value);
        assert!(!code_local_path.exists());
    }

    #[test]
    fn test_reconcile_pull_config_failure_goes_straight_to_check_app() {
        let root = tempfile::tempdir().unwrap();
        let config_bare = root.path().join("config.git");
        let code_bare = root.path().join("code.git");
        init_bare(&config_bare);
        init_bare(&code_bare);

        let hash = seed_code_repo(&code_bare);
        let code_local_path = root.path().join("deployed-app");
        let marker = code_local_path.join("pre_ran.txt");

        seed_config_repo(
            &config_bare,
            "host-01",
            &format!(
                r#"
[web]
code_url = "{}"
code_commit_hash = "{hash}"
code_local_path = "{}"
pre_updation_command = "touch pre_ran.txt"
"#,
                code_bare.display(),
                code_local_path.display()
            ),
        );

        let state_root = root.path().join("state");
        let mut reconciler = Reconciler::new(state_root, "host-01".to_string());
        reconciler
            .reconcile("web", &config_bare.display().to_string())
            .unwrap();
        assert!(!marker.exists());

        // Diverge the code tree's HEAD from the declared hash by hand, the
        // way an update_required check would see a mismatch, then break the
        // config repo so this tick's pull_config fails.
        git(&code_local_path, &["checkout", "-q", "-b", "manual-drift"]);
        std::fs::write(code_local_path.join("app.txt"), "manually-edited").unwrap();
        git(&code_local_path, &["config", "user.email", "test@example.com"]);
        git(&code_local_path, &["config", "user.name", "test"]);
        git(&code_local_path, &["commit", "-q", "-am", "manual drift"]);
        let drifted_head = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&code_local_path)
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap();

        std::fs::remove_dir_all(&config_bare).unwrap();

        let feedback = reconciler
            .reconcile("web", &config_bare.display().to_string())
            .unwrap();

        assert!(!feedback.config_updation.updation_return_value);
        assert!(
            !marker.exists(),
            "pull_app must not run when this tick's pull_config failed"
        );
        let head_after = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&code_local_path)
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap();
        assert_eq!(
            head_after, drifted_head,
            "check_app must not re-pin the code tree"
        );
    }

    #[test]
    fn test_reconcile_missing_infra_meta_propagates_error() {
        let root = tempfile::tempdir().unwrap();
        let config_bare = root.path().join("config.git");
        init_bare(&config_bare);

        let scratch = tempfile::tempdir().unwrap();
        git(scratch.path(), &["clone", "-q", config_bare.to_str().unwrap(), "."]);
        git(scratch.path(), &["config", "user.email", "test@example.com"]);
        git(scratch.path(), &["config", "user.name", "test"]);
        std::fs::create_dir_all(scratch.path().join("host-01")).unwrap();
        std::fs::write(scratch.path().join("host-01").join(".keep"), "").unwrap();
        git(scratch.path(), &["add", "-A"]);
        git(scratch.path(), &["commit", "-q", "-m", "seed"]);
        git(scratch.path(), &["push", "-q", "origin", "HEAD:refs/heads/main"]);

        let state_root = root.path().join("state");
        let mut reconciler = Reconciler::new(state_root, "host-01".to_string());
        let result = reconciler.reconcile("web", &config_bare.display().to_string());
        assert!(matches!(result, Err(ConfigResolverError::MissingInfraMeta { .. })));
    }
}
