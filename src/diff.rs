//! The Diff Oracle (C4): pure, side-effect-free comparisons used to decide
//! whether an application needs a full `pull_app` or just a status check.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use crate::infra_meta::AppPlan;

/// Whitespace-insensitive file equality.
///
/// `None` on either side is "no file declared", which is trivially
/// satisfied. A missing file on disk is never equivalent to anything.
pub fn files_equivalent(a: Option<&Path>, b: Option<&Path>) -> bool {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return true,
    };

    if !a.exists() || !b.exists() {
        return false;
    }

    let Ok(a_bytes) = std::fs::read(a) else {
        return false;
    };
    let Ok(b_bytes) = std::fs::read(b) else {
        return false;
    };

    strip_whitespace(&a_bytes) == strip_whitespace(&b_bytes)
}

fn strip_whitespace(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|&b| b != b' ' && b != b'\n')
        .collect()
}

/// Whether `local_path`'s HEAD resolves to the same commit as `hash`.
///
/// `hash` may be a full/short SHA or any other valid git revision; both it
/// and `HEAD` are resolved via `git rev-parse` before comparing, so a short
/// hash still matches a full HEAD.
pub fn head_matches(local_path: &Path, hash: &str) -> bool {
    let Some(head) = rev_parse(local_path, "HEAD") else {
        return false;
    };
    let Some(target) = rev_parse(local_path, hash) else {
        return false;
    };
    head == target
}

fn rev_parse(local_path: &Path, rev: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", rev])
        .current_dir(local_path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// True iff the set of keys present in `prev` is not a subset of the set of
/// keys present in `next` — i.e. the declared schema lost a field. Schema
/// *widening* (next gains keys prev didn't have) does not count as change;
/// this deliberately ignores value changes, which are instead caught by the
/// hash/file checks in the reconciler.
pub fn plan_changed(prev: Option<&AppPlan>, next: Option<&AppPlan>) -> bool {
    !key_set(prev).is_subset(&key_set(next))
}

fn key_set(plan: Option<&AppPlan>) -> HashSet<&'static str> {
    let Some(plan) = plan else {
        return HashSet::new();
    };

    let mut keys = HashSet::from(["code_url", "code_commit_hash", "code_local_path"]);
    if plan.pre_updation_command.is_some() {
        keys.insert("pre_updation_command");
    }
    if plan.post_updation_command.is_some() {
        keys.insert("post_updation_command");
    }
    if plan.config_src_path_abs.is_some() {
        keys.insert("config_copy");
    }
    keys
}
