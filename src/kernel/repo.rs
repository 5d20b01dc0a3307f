//! Repository working directories.
//!
//! Every repository gets a stable directory under the repo cache, named by
//! the SHA-256 of its URL, so repeated builds of the same repository reuse
//! the same clone.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::ServerConfig;
use crate::error::ConfigError;

/// Content-addressed directory name for a repository URL.
pub fn repo_dir_name(repository: &str) -> String {
    format!("{:x}", Sha256::digest(repository.as_bytes()))
}

/// `<repo_cache_root>/<repo_dir_name>`
pub fn work_dir_for(config: &ServerConfig, repository: &str) -> PathBuf {
    config.repo_cache_root.join(repo_dir_name(repository))
}

/// Fail when the filesystem holding `path` has less than `min_gb` free.
///
/// `path` may not exist yet; the nearest existing ancestor is checked.
pub fn check_free_space(path: &Path, min_gb: u64) -> Result<(), ConfigError> {
    if min_gb == 0 {
        return Ok(());
    }

    let existing = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"));

    let stat = nix::sys::statvfs::statvfs(existing).map_err(|e| {
        ConfigError::InsufficientResources(format!(
            "cannot stat filesystem at {}: {}",
            existing.display(),
            e
        ))
    })?;

    let free_bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
    let free_gb = free_bytes / (1024 * 1024 * 1024);
    if free_gb < min_gb {
        return Err(ConfigError::InsufficientResources(format!(
            "{}GB free at {}, {}GB required",
            free_gb,
            existing.display(),
            min_gb
        )));
    }

    log::debug!("[Build] [PREPARATION] {}GB free at {}", free_gb, existing.display());
    Ok(())
}
