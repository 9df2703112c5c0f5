//! Host-level agent configuration (`<config-dir>/config.toml`).
//!
//! Not to be confused with `InfraMeta` (`src/infra_meta.rs`), which is the
//! per-host contract read out of the *config repository* this agent clones.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn default_interval() -> u64 {
    300
}

/// One declared application: a name and where to find its config repo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDeclaration {
    /// `<url>[@<branch>]` shorthand, resolved by [`crate::infra_meta::parse_url`].
    pub config_url: String,
}

/// The agent's own host-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// This host's identity: used as committer name and as the key under
    /// which it publishes status.
    pub infra_name: String,

    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Declaration order is preserved (`IndexMap`) because apps are
    /// reconciled in declaration order every tick.
    #[serde(default)]
    pub applications: IndexMap<String, AppDeclaration>,
}

impl HostConfig {
    /// Load and parse the host config file.
    ///
    /// Missing or unparseable host config is a fatal startup condition
    /// (`HostConfigUnavailable` in the error taxonomy) — the caller is
    /// expected to propagate the error out of `main`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host config at {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse host config at {}", path.display()))
    }
}

/// Default location of the host config file.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/gitops-agent/config.toml")
}
