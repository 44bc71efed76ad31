//! Multi-source download and extraction.
//!
//! Sources are tried strictly in order. Each one is streamed into a
//! uniquely named partial file inside the target directory and then
//! unpacked as a gzip tarball with its top-level folder stripped.

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Url;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::{FailureReason, InstallError, SourceFailure};

/// Downloads and extracts the first working source into `target`.
///
/// A source only counts as working if its archive yields `target/<name>`.
/// Returns the source that succeeded. Callers must not run two installs
/// into the same `target` concurrently.
pub async fn install(sources: &[Url], target: &Path, name: &str) -> Result<Url, InstallError> {
    tokio::fs::create_dir_all(target).await.map_err(|e| {
        InstallError::io(
            format!("Failed to create install directory {}", target.display()),
            e,
        )
    })?;

    let client = reqwest::Client::new();
    let mut attempts = Vec::with_capacity(sources.len());

    for source in sources {
        info!("Downloading {}", source);
        match install_from(&client, source, target, name).await {
            Ok(()) => {
                info!("Installed from {} into {}", source, target.display());
                return Ok(source.clone());
            }
            Err(reason) => {
                warn!("Download from {} failed: {}", source, reason);
                attempts.push(SourceFailure {
                    source_url: source.to_string(),
                    reason,
                });
            }
        }
    }

    Err(InstallError::Download { attempts })
}

async fn install_from(
    client: &reqwest::Client,
    source: &Url,
    target: &Path,
    name: &str,
) -> Result<(), FailureReason> {
    let partial = target.join(format!(".download-{}.tar.gz", uuid::Uuid::new_v4()));

    let result = match download_to(client, source, &partial).await {
        Ok(()) => extract(&partial, target).await,
        Err(reason) => Err(reason),
    };
    // A stale copy from an earlier install must not count.
    let result = result.and_then(|unpacked| {
        if unpacked.iter().any(|p| p == Path::new(name)) && target.join(name).is_file() {
            Ok(())
        } else {
            Err(FailureReason::Archive(format!("archive did not contain {name}")))
        }
    });

    if let Err(e) = tokio::fs::remove_file(&partial).await {
        debug!("Could not remove {}: {}", partial.display(), e);
    }
    result
}

async fn download_to(
    client: &reqwest::Client,
    source: &Url,
    dest: &Path,
) -> Result<(), FailureReason> {
    let mut body = open(client, source).await?;
    let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;

    let mut written = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len();
        file.write_all(&chunk).await.map_err(write_err)?;
    }
    file.flush().await.map_err(write_err)?;

    debug!("Downloaded {} bytes from {}", written, source);
    Ok(())
}

/// Opens a source as a stream of byte chunks.
async fn open(
    client: &reqwest::Client,
    source: &Url,
) -> Result<BoxStream<'static, Result<Bytes, FailureReason>>, FailureReason> {
    if source.scheme() == "file" {
        let path = source
            .to_file_path()
            .map_err(|()| FailureReason::Read(format!("not a local path: {source}")))?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| FailureReason::Read(e.to_string()))?;
        return Ok(stream::once(async move { Ok(Bytes::from(data)) }).boxed());
    }

    let response = client
        .get(source.clone())
        .send()
        .await
        .map_err(|e| FailureReason::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FailureReason::Status(status.as_u16()));
    }

    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| FailureReason::Transport(e.to_string())))
        .boxed())
}

async fn extract(archive: &Path, target: &Path) -> Result<Vec<PathBuf>, FailureReason> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_stripped(&archive, &target))
        .await
        .map_err(|e| FailureReason::Archive(e.to_string()))?
}

/// Unpacks a `.tar.gz` into `target`, dropping the first path component.
///
/// Returns the unpacked paths relative to `target`.
pub(crate) fn unpack_stripped(
    archive: &Path,
    target: &Path,
) -> Result<Vec<PathBuf>, FailureReason> {
    let file = File::open(archive).map_err(|e| FailureReason::Read(e.to_string()))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));

    let mut unpacked = Vec::new();
    for entry in tarball.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let entry_path = entry.path().map_err(archive_err)?.into_owned();
        let Some(rel) = strip_first_component(&entry_path)? else {
            continue;
        };

        let out_path = target.join(&rel);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        // Replace rather than rewrite, so a binary that is currently running
        // can still be updated.
        if out_path.is_file() {
            std::fs::remove_file(&out_path).map_err(write_err)?;
        }
        entry.unpack(&out_path).map_err(write_err)?;
        unpacked.push(rel);
    }

    if unpacked.is_empty() {
        return Err(FailureReason::Archive(
            "archive has no entries below its top-level folder".to_string(),
        ));
    }
    debug!("Unpacked {} entries into {}", unpacked.len(), target.display());
    Ok(unpacked)
}

/// `top/bin/x` becomes `bin/x`; the top-level entry itself yields `None`.
fn strip_first_component(path: &Path) -> Result<Option<PathBuf>, FailureReason> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part),
            _ => {
                return Err(FailureReason::Archive(format!(
                    "unsafe entry path {}",
                    path.display()
                )))
            }
        }
    }

    if parts.len() < 2 {
        return Ok(None);
    }
    Ok(Some(parts[1..].iter().collect()))
}

#[allow(clippy::needless_pass_by_value)]
fn archive_err(e: std::io::Error) -> FailureReason {
    FailureReason::Archive(e.to_string())
}

#[allow(clippy::needless_pass_by_value)]
fn write_err(e: std::io::Error) -> FailureReason {
    FailureReason::Write(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, tarball, unused_port};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_strip_first_component() {
        assert_eq!(
            strip_first_component(Path::new("pkg/near-sandbox")).unwrap(),
            Some(PathBuf::from("near-sandbox"))
        );
        assert_eq!(
            strip_first_component(Path::new("./pkg/bin/tool")).unwrap(),
            Some(PathBuf::from("bin/tool"))
        );
        assert_eq!(strip_first_component(Path::new("pkg/")).unwrap(), None);
        assert!(strip_first_component(Path::new("pkg/../../etc/passwd")).is_err());
    }

    #[test]
    fn test_unpack_strips_top_level_folder() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.tar.gz");
        fs::write(
            &archive,
            tarball(&[("pkg/near-sandbox", b"#!/bin/sh\n"), ("pkg/README", b"hi")]),
        )
        .unwrap();
        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();

        let unpacked = unpack_stripped(&archive, &target).unwrap();

        assert_eq!(
            unpacked,
            vec![PathBuf::from("near-sandbox"), PathBuf::from("README")]
        );
        assert_eq!(fs::read(target.join("near-sandbox")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::read(target.join("README")).unwrap(), b"hi");
        assert!(!target.join("pkg").exists());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("a.tar.gz");
        fs::write(&archive, b"<html>not found</html>").unwrap();
        let err = unpack_stripped(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, FailureReason::Archive(_)));
    }

    #[tokio::test]
    async fn test_all_sources_fail() {
        let dir = tempdir().unwrap();
        let not_found = serve(|_| (404, b"missing".to_vec())).await;
        let sources = vec![
            Url::parse(&format!("http://127.0.0.1:{}/a.tar.gz", unused_port())).unwrap(),
            Url::parse(&format!("http://127.0.0.1:{}/b.tar.gz", not_found.port)).unwrap(),
        ];

        let err = install(&sources, dir.path(), "near-sandbox").await.unwrap_err();

        let attempts = err.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].source_url, sources[0].to_string());
        assert!(matches!(attempts[0].reason, FailureReason::Transport(_)));
        assert_eq!(attempts[1].reason, FailureReason::Status(404));
        let message = err.to_string();
        assert!(message.contains(sources[0].as_str()));
        assert!(message.contains(sources[1].as_str()));

        // No partial downloads are left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_second_source() {
        let dir = tempdir().unwrap();
        let body = tarball(&[("near-sandbox-pkg/near-sandbox", b"binary")]);
        let server = serve(move |_| (200, body.clone())).await;
        let sources = vec![
            Url::parse(&format!("http://127.0.0.1:{}/a.tar.gz", unused_port())).unwrap(),
            Url::parse(&format!("http://127.0.0.1:{}/b.tar.gz", server.port)).unwrap(),
        ];

        let used = install(&sources, dir.path(), "near-sandbox").await.unwrap();

        assert_eq!(used, sources[1]);
        assert_eq!(fs::read(dir.path().join("near-sandbox")).unwrap(), b"binary");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("mirror.tar.gz");
        fs::write(&archive, tarball(&[("pkg/near-sandbox", b"local")])).unwrap();
        let target = dir.path().join("bin");

        let source = Url::from_file_path(&archive).unwrap();
        install(&[source], &target, "near-sandbox").await.unwrap();

        assert_eq!(fs::read(target.join("near-sandbox")).unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_archive_without_binary_tries_next_source() {
        let dir = tempdir().unwrap();
        let wrong = tarball(&[("pkg/other-tool", b"other")]);
        let right = tarball(&[("pkg/near-sandbox", b"binary")]);
        let first = serve(move |_| (200, wrong.clone())).await;
        let second = serve(move |_| (200, right.clone())).await;
        let sources = vec![
            Url::parse(&format!("http://127.0.0.1:{}/a.tar.gz", first.port)).unwrap(),
            Url::parse(&format!("http://127.0.0.1:{}/b.tar.gz", second.port)).unwrap(),
        ];

        let used = install(&sources, dir.path(), "near-sandbox").await.unwrap();

        assert_eq!(used, sources[1]);
        assert_eq!(second.hits(), 1);
        assert_eq!(fs::read(dir.path().join("near-sandbox")).unwrap(), b"binary");
    }

    #[tokio::test]
    async fn test_archive_without_binary_is_reported() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("mirror.tar.gz");
        fs::write(&archive, tarball(&[("pkg/other-tool", b"other")])).unwrap();
        let target = dir.path().join("bin");

        let source = Url::from_file_path(&archive).unwrap();
        let err = install(&[source], &target, "near-sandbox").await.unwrap_err();

        assert_eq!(
            err.attempts()[0].reason,
            FailureReason::Archive("archive did not contain near-sandbox".to_string())
        );
        assert!(!target.join("near-sandbox").exists());
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_mask_wrong_archive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("near-sandbox"), "old").unwrap();
        let archive = dir.path().join("mirror.tar.gz");
        fs::write(&archive, tarball(&[("pkg/other-tool", b"other")])).unwrap();

        let source = Url::from_file_path(&archive).unwrap();
        let err = install(&[source], dir.path(), "near-sandbox").await.unwrap_err();
        assert!(err.is_download());
    }
}
