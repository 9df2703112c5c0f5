//! Shared helpers for driving throwaway local bare repositories in
//! integration tests, the same way the unit tests in `src/reconciler.rs`
//! build fixtures, just shared across more than one test file.

use std::path::Path;
use std::process::Command;

pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git available in test environment");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

pub fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git available in test environment");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// `git init --bare` with HEAD pointed at `main`, since the ambient
/// `init.defaultBranch` in a CI sandbox is not guaranteed to be `main`.
pub fn init_bare(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "--bare", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
}

/// Seed `bare`'s `main` branch with a single commit, the way a real config
/// repo always already has `infra_meta.toml` committed before this agent
/// ever clones it.
pub fn seed_main_branch(bare: &Path) {
    let scratch = tempfile::tempdir().unwrap();
    git(scratch.path(), &["clone", "-q", bare.to_str().unwrap(), "."]);
    git(scratch.path(), &["config", "user.email", "test@example.com"]);
    git(scratch.path(), &["config", "user.name", "test"]);
    std::fs::write(scratch.path().join(".keep"), "").unwrap();
    git(scratch.path(), &["add", "-A"]);
    git(scratch.path(), &["commit", "-q", "-m", "seed"]);
    git(scratch.path(), &["push", "-q", "origin", "HEAD:refs/heads/main"]);
}

pub fn seed_code_repo(bare: &Path, content: &str) -> String {
    let scratch = tempfile::tempdir().unwrap();
    git(scratch.path(), &["clone", "-q", bare.to_str().unwrap(), "."]);
    git(scratch.path(), &["config", "user.email", "test@example.com"]);
    git(scratch.path(), &["config", "user.name", "test"]);
    std::fs::write(scratch.path().join("app.txt"), content).unwrap();
    git(scratch.path(), &["add", "-A"]);
    git(scratch.path(), &["commit", "-q", "-m", content]);
    git(scratch.path(), &["push", "-q", "origin", "HEAD:refs/heads/main"]);
    git_output(scratch.path(), &["rev-parse", "HEAD"])
}
