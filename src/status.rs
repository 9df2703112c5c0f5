//! The Status Publisher (C6).
//!
//! Maintains the `<infra>.toml` feedback document on each app's orphan
//! monitoring branch, committing and pushing only when something actually
//! changed (or on the first publish of the process's lifetime, to
//! guarantee a heartbeat after a restart).

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::git::GitDriver;

/// One git outcome as recorded in the feedback document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitStats {
    #[serde(rename = "updation-return-value")]
    pub updation_return_value: bool,
    #[serde(rename = "git-status")]
    pub git_status: String,
    #[serde(rename = "git-repo-latest-commit")]
    pub git_repo_latest_commit: String,
}

/// Pre/post-update command output as recorded in the feedback document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStats {
    #[serde(rename = "command-return-val")]
    pub command_return_val: String,
    #[serde(rename = "command-run-logs")]
    pub command_run_logs: String,
}

/// The sentinel value used when no command ran this tick.
pub const NOTHING_WAS_RUN: &str = "Nothing was run";

impl CommandStats {
    pub fn nothing_was_run() -> Self {
        Self {
            command_return_val: "true".to_string(),
            command_run_logs: NOTHING_WAS_RUN.to_string(),
        }
    }
}

/// One app's published record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppFeedback {
    #[serde(rename = "config-updation")]
    pub config_updation: GitStats,
    #[serde(rename = "app-updation")]
    pub app_updation: GitStats,
    #[serde(rename = "extra-command-output")]
    pub extra_command_output: CommandStats,
}

/// The whole feedback document published to the monitoring branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackDocument {
    #[serde(rename = "last-updated", default)]
    pub last_updated: String,
    #[serde(flatten)]
    pub apps: IndexMap<String, AppFeedback>,
}

impl FeedbackDocument {
    /// Load from disk; a missing or unparseable file is treated as an empty
    /// document rather than an error (`FeedbackParseError` in the error
    /// taxonomy).
    pub fn load(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&contents).unwrap_or_default()
    }
}

/// Publishes per-app feedback records onto each app's monitoring branch.
///
/// `published_once` tracks, per app, whether this process has published at
/// least once — cleared only by a process restart, never persisted.
pub struct StatusPublisher {
    published_once: HashSet<String>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self {
            published_once: HashSet::new(),
        }
    }

    /// Publish `record` for `app_name`, skipping the write/commit/push when
    /// it would be a no-op. Returns whether a push happened.
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &mut self,
        driver: &GitDriver,
        state_root: &Path,
        config_url: &str,
        config_branch: &str,
        infra_name: &str,
        app_name: &str,
        mut record: AppFeedback,
    ) -> Result<bool> {
        let monitoring_name = format!("{app_name}-monitoring");
        let monitoring_branch = format!("{config_branch}-monitoring");
        let worktree = state_root.join("app-configs").join(&monitoring_name);

        driver
            .update_repo(
                &monitoring_name,
                config_url,
                &monitoring_branch,
                infra_name,
                &worktree,
                None,
                true,
            )
            .with_context(|| format!("failed to prepare monitoring worktree for {app_name}"))?;

        let feedback_file = worktree.join(format!("{infra_name}.toml"));
        let mut feedback = FeedbackDocument::load(&feedback_file);

        let previous = feedback.apps.get(app_name).cloned();

        if record.extra_command_output.command_run_logs == NOTHING_WAS_RUN
            && let Some(prev) = &previous
        {
            record.extra_command_output = prev.extra_command_output.clone();
        }

        let unchanged = previous.as_ref() == Some(&record);
        if unchanged && self.published_once.contains(app_name) {
            log::debug!("Status unchanged for {app_name}, skipping publish");
            return Ok(false);
        }

        feedback.apps.insert(app_name.to_string(), record);
        feedback.last_updated = now_local();

        let mut body = toml::to_string(&feedback).context("failed to serialize feedback document")?;
        body.push_str("\n# You can render the escaped text with https://onlinetexttools.com/unescape-text");
        std::fs::write(&feedback_file, body)
            .with_context(|| format!("failed to write {}", feedback_file.display()))?;

        let pushed = driver
            .publish(&worktree, &monitoring_branch, infra_name)
            .with_context(|| format!("failed to publish status for {app_name}"))?;

        self.published_once.insert(app_name.to_string());
        Ok(pushed)
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

fn now_local() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
