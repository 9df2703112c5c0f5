//! The Scheduler (C7): the process-wide loop.
//!
//! Iterates declared applications in order, runs one reconciliation tick per
//! app, publishes its status, then sleeps for the configured interval.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::HostConfig;
use crate::infra_meta;
use crate::reconciler::Reconciler;
use crate::status::StatusPublisher;

/// Default state root under which per-app config/monitoring worktrees live.
pub fn default_state_root() -> PathBuf {
    PathBuf::from("/opt/gitops-agent")
}

pub struct Scheduler {
    host_config: HostConfig,
    state_root: PathBuf,
    reconciler: Reconciler,
    publisher: StatusPublisher,
}

impl Scheduler {
    pub fn new(host_config: HostConfig, state_root: PathBuf) -> Self {
        let reconciler = Reconciler::new(state_root.clone(), host_config.infra_name.clone());
        Self {
            host_config,
            state_root,
            reconciler,
            publisher: StatusPublisher::new(),
        }
    }

    /// Run reconciliation ticks forever, sleeping `interval` seconds between
    /// each. Only returns on an unrecoverable error; per-app failures are
    /// logged and the loop proceeds to the next app/tick.
    pub fn run_forever(&mut self) -> Result<()> {
        loop {
            self.tick();
            std::thread::sleep(Duration::from_secs(self.host_config.interval));
        }
    }

    /// Run a single pass over every declared application.
    pub fn tick(&mut self) {
        let infra_name = self.host_config.infra_name.clone();
        for (app_name, decl) in &self.host_config.applications {
            log::info!("Reconciling {app_name}");

            let feedback = match self.reconciler.reconcile(app_name, &decl.config_url) {
                Ok(feedback) => feedback,
                Err(e) => {
                    log::error!("Reconciliation failed for {app_name}: {e}");
                    continue;
                }
            };

            let (config_url, config_branch) = infra_meta::parse_url(&decl.config_url);
            if let Err(e) = self.publisher.publish(
                &crate::git::GitDriver::new(),
                &self.state_root,
                &config_url,
                &config_branch,
                &infra_name,
                app_name,
                feedback,
            ) {
                log::error!("Status publish failed for {app_name}: {e}");
            }
        }
    }
}

/// Open the host config file in `$EDITOR` (default `/usr/bin/nano`) and wait
/// for it to exit. This is the agent's one-shot `--configure` mode.
pub fn run_configure(config_path: &Path) -> Result<()> {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "/usr/bin/nano".to_string());

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if !config_path.exists() {
        std::fs::write(config_path, "infra_name = \"\"\ninterval = 300\n")
            .with_context(|| format!("failed to create {}", config_path.display()))?;
    }

    let status = Command::new(&editor)
        .arg(config_path)
        .status()
        .with_context(|| format!("failed to launch editor {editor}"))?;

    if !status.success() {
        anyhow::bail!("editor {editor} exited with {status}");
    }
    Ok(())
}
