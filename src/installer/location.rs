//! Install directory resolution.
//!
//! Precedence: explicit destination, then a directory on the search path
//! that already holds the executable, then the managed default directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::error::InstallError;
use super::exists;

/// Where an install directory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOrigin {
    /// Supplied by the caller.
    Explicit,
    /// Found on the search path with the executable already present.
    SearchPath,
    /// The installer-owned default directory.
    ManagedDefault,
}

/// Directories searched for an already-installed executable.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    /// Searched before anything else.
    pub priority: Option<PathBuf>,
    /// A `PATH`-style list, split with the platform separator.
    pub path_list: Option<OsString>,
}

impl SearchPaths {
    /// All directories in search order.
    pub fn dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.priority.iter().cloned().collect();
        if let Some(ref list) = self.path_list {
            dirs.extend(std::env::split_paths(list).filter(|p| !p.as_os_str().is_empty()));
        }
        dirs
    }

    /// First directory containing a regular file named `name`.
    pub async fn find(&self, name: &str) -> Option<PathBuf> {
        for dir in self.dirs() {
            if exists(&dir.join(name)).await {
                return Some(dir);
            }
        }
        None
    }
}

/// Resolves the install directory for `name`.
///
/// The default directory is created (with parents) when it is selected.
pub async fn resolve_location(
    name: &str,
    explicit: Option<&Path>,
    search: &SearchPaths,
    default_dir: &Path,
) -> Result<(PathBuf, LocationOrigin), InstallError> {
    if let Some(dir) = explicit {
        debug!("Using explicit install directory {}", dir.display());
        return Ok((dir.to_path_buf(), LocationOrigin::Explicit));
    }

    if let Some(dir) = search.find(name).await {
        debug!("Found {} on search path in {}", name, dir.display());
        return Ok((dir, LocationOrigin::SearchPath));
    }

    tokio::fs::create_dir_all(default_dir)
        .await
        .map_err(|e| {
            InstallError::io(
                format!("Failed to create install directory {}", default_dir.display()),
                e,
            )
        })?;
    debug!("Using default install directory {}", default_dir.display());
    Ok((default_dir.to_path_buf(), LocationOrigin::ManagedDefault))
}
