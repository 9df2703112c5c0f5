//! Dubious-ownership recovery: if a working tree is owned by a user other
//! than the one running the agent, git refuses to operate on it. We reclaim
//! ownership recursively before touching the tree, rather than carrying a
//! `safe.directory` exception around.

use std::path::Path;

use super::GitError;

#[cfg(unix)]
pub fn reclaim(path: &Path) -> Result<(), GitError> {
    use std::os::unix::fs::MetadataExt;

    let effective_uid = nix::unistd::Uid::effective();

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| GitError::CommandFailed(format!("failed to stat {}: {e}", path.display())))?;

    if metadata.uid() == effective_uid.as_raw() {
        return Ok(());
    }

    log::info!(
        "Reclaiming ownership of {} (was uid {})",
        path.display(),
        metadata.uid()
    );
    chown_recursive(path, effective_uid, nix::unistd::Gid::effective())
}

#[cfg(not(unix))]
pub fn reclaim(_path: &Path) -> Result<(), GitError> {
    Ok(())
}

#[cfg(unix)]
fn chown_recursive(
    path: &Path,
    uid: nix::unistd::Uid,
    gid: nix::unistd::Gid,
) -> Result<(), GitError> {
    nix::unistd::chown(path, Some(uid), Some(gid))
        .map_err(|e| GitError::CommandFailed(format!("chown {} failed: {e}", path.display())))?;

    if path.is_dir() && !path.is_symlink() {
        let entries = std::fs::read_dir(path)
            .map_err(|e| GitError::CommandFailed(format!("failed to read {}: {e}", path.display())))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| GitError::CommandFailed(format!("failed to read entry: {e}")))?;
            chown_recursive(&entry.path(), uid, gid)?;
        }
    }

    Ok(())
}
