//! The Config Resolver (C2).
//!
//! Parses the `<url>[@<branch>]` shorthand used in the host config, and
//! resolves the per-host `infra_meta.toml` inside a cloned config repo into
//! a typed [`AppPlan`].

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

/// Errors resolving an app's desired state. Unlike `GitError`, these are
/// fatal for a single app's tick, not for the whole process.
#[derive(Debug)]
pub enum ConfigResolverError {
    /// `<infra_name>/infra_meta.toml` is absent even though the config repo
    /// has been cloned.
    MissingInfraMeta { path: PathBuf },
    /// `infra_meta.toml` exists but is not valid TOML, or its `AppPlan`
    /// fails the src/dst pairing invariant.
    InvalidInfraMeta(String),
    /// `infra_meta.toml` parsed fine but has no entry for this app.
    AppNotFound { app_name: String },
}

impl std::fmt::Display for ConfigResolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigResolverError::MissingInfraMeta { path } => {
                write!(f, "infra_meta.toml not found at {}", path.display())
            }
            ConfigResolverError::InvalidInfraMeta(msg) => write!(f, "invalid infra_meta.toml: {msg}"),
            ConfigResolverError::AppNotFound { app_name } => {
                write!(f, "no entry for app '{app_name}' in infra_meta.toml")
            }
        }
    }
}

impl std::error::Error for ConfigResolverError {}

/// Raw per-app shape of `infra_meta.toml`, deserialized directly from TOML.
#[derive(Debug, Clone, Deserialize)]
struct AppMeta {
    code_url: String,
    code_commit_hash: String,
    code_local_path: PathBuf,
    #[serde(default)]
    pre_updation_command: Option<String>,
    #[serde(default)]
    post_updation_command: Option<String>,
    #[serde(default)]
    config_src_path_rel_in_this_repo: Option<String>,
    #[serde(default)]
    config_dst_path_abs: Option<PathBuf>,
}

/// The resolved, in-memory desired state for one application.
///
/// Recomputed every reconciliation tick; never cached across ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPlan {
    pub code_url: String,
    pub code_commit_hash: String,
    pub code_local_path: PathBuf,
    pub pre_updation_command: Option<String>,
    pub post_updation_command: Option<String>,
    /// Either both `None` ("no config-file copy step for this app") or both
    /// `Some` — enforced at resolution time.
    pub config_src_path_abs: Option<PathBuf>,
    pub config_dst_path_abs: Option<PathBuf>,
}

/// Split `<url>[@<branch>]` into its parts.
///
/// A single leading `git@` is protected from the split so SSH URLs like
/// `git@host:org/repo` are not mistaken for a trailing `@branch` selector.
/// Splitting happens on the *last* `@` in the remainder, so a bare SSH URL
/// with no branch selector parses to itself with branch `"main"`.
pub fn parse_url(raw: &str) -> (String, String) {
    let had_git_prefix = raw.starts_with("git@");
    let tail = if had_git_prefix { &raw[4..] } else { raw };

    let Some(at_idx) = tail.rfind('@') else {
        return (raw.to_string(), "main".to_string());
    };

    let (left, right) = tail.split_at(at_idx);
    let branch = right[1..].to_string();
    let url = if had_git_prefix {
        format!("git@{left}")
    } else {
        left.to_string()
    };

    let suffix = format!("@{branch}");
    let url = url.strip_suffix(&suffix).unwrap_or(&url).to_string();

    (url, branch)
}

/// Resolve `app_name`'s desired state out of the config repo cloned at
/// `config_repo_root`.
///
/// Returns `Ok(None)` if `<infra_name>/` doesn't exist yet (the config repo
/// hasn't been cloned this tick — allowed). Returns
/// `Err(MissingInfraMeta)` if the directory exists but `infra_meta.toml`
/// does not.
pub fn resolve(
    app_name: &str,
    infra_name: &str,
    config_repo_root: &Path,
) -> Result<Option<AppPlan>, ConfigResolverError> {
    let infra_dir = config_repo_root.join(infra_name);
    if !infra_dir.exists() {
        return Ok(None);
    }

    let meta_path = infra_dir.join("infra_meta.toml");
    if !meta_path.exists() {
        return Err(ConfigResolverError::MissingInfraMeta { path: meta_path });
    }

    let contents = std::fs::read_to_string(&meta_path)
        .map_err(|e| ConfigResolverError::InvalidInfraMeta(e.to_string()))?;
    let table: IndexMap<String, AppMeta> =
        toml::from_str(&contents).map_err(|e| ConfigResolverError::InvalidInfraMeta(e.to_string()))?;

    let meta = table
        .get(app_name)
        .ok_or_else(|| ConfigResolverError::AppNotFound {
            app_name: app_name.to_string(),
        })?;

    let config_src_path_abs = meta
        .config_src_path_rel_in_this_repo
        .as_ref()
        .map(|rel| infra_dir.join(rel));

    match (&config_src_path_abs, &meta.config_dst_path_abs) {
        (Some(_), Some(_)) | (None, None) => {}
        _ => {
            return Err(ConfigResolverError::InvalidInfraMeta(format!(
                "app '{app_name}': config_src_path_rel_in_this_repo and config_dst_path_abs must both be set or both absent"
            )));
        }
    }

    Ok(Some(AppPlan {
        code_url: meta.code_url.clone(),
        code_commit_hash: meta.code_commit_hash.clone(),
        code_local_path: meta.code_local_path.clone(),
        pre_updation_command: meta.pre_updation_command.clone(),
        post_updation_command: meta.post_updation_command.clone(),
        config_src_path_abs,
        config_dst_path_abs: meta.config_dst_path_abs.clone(),
    }))
}
