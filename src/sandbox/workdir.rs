//! Working directory setup: clearing, cloning and patching the node config.

use std::fs;
use std::io;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::config::NODE_CONFIG_FILE;
use super::SandboxError;

/// Removes `dir` and everything below it. A missing directory is fine.
pub(crate) async fn clear(dir: &Path) -> Result<(), SandboxError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("Cleared {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SandboxError::io(
            format!("Failed to clear {}", dir.display()),
            e,
        )),
    }
}

/// Replaces `dst` with a recursive copy of `src`.
pub(crate) async fn clone_dir(src: &Path, dst: &Path) -> Result<u64, SandboxError> {
    if !src.is_dir() {
        return Err(SandboxError::io(
            format!("Clone source {} is not a directory", src.display()),
            io::Error::from(io::ErrorKind::NotFound),
        ));
    }
    // Clearing one would destroy the other.
    if dst.starts_with(src) || src.starts_with(dst) {
        return Err(SandboxError::io(
            format!(
                "Clone source {} overlaps the working directory {}",
                src.display(),
                dst.display()
            ),
            io::Error::from(io::ErrorKind::InvalidInput),
        ));
    }

    clear(dst).await?;

    let (from, to) = (src.to_path_buf(), dst.to_path_buf());
    let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
        .await
        .map_err(|e| SandboxError::io("Copy task failed", io::Error::other(e)))?
        .map_err(|e| {
            SandboxError::io(
                format!("Failed to copy {} to {}", src.display(), dst.display()),
                e,
            )
        })?;

    debug!(
        "Cloned {} files from {} into {}",
        copied,
        src.display(),
        dst.display()
    );
    Ok(copied)
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_link(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Merges `patch` into `<home>/config.json`. A missing file is skipped.
pub(crate) async fn patch_node_config(home: &Path, patch: &Value) -> Result<(), SandboxError> {
    let path = home.join(NODE_CONFIG_FILE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("No {} to patch", path.display());
            return Ok(());
        }
        Err(e) => {
            return Err(SandboxError::io(
                format!("Failed to read {}", path.display()),
                e,
            ))
        }
    };

    let mut config: Value = serde_json::from_str(&content).map_err(|e| {
        SandboxError::io(format!("Failed to parse {}", path.display()), e.into())
    })?;
    merge(&mut config, patch);

    let patched = serde_json::to_string_pretty(&config).map_err(|e| {
        SandboxError::io(format!("Failed to encode {}", path.display()), e.into())
    })?;
    tokio::fs::write(&path, patched)
        .await
        .map_err(|e| SandboxError::io(format!("Failed to write {}", path.display()), e))?;

    debug!("Patched {}", path.display());
    Ok(())
}

/// JSON merge patch: objects merge key by key, `null` removes, anything else replaces.
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in entries {
            if value.is_null() {
                map.remove(key);
            } else {
                merge(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}
