//! Binary installer for the sandbox executable.
//!
//! Resolves where the executable lives, downloads it from a prioritized
//! list of sources when missing, and removes it again when it lives in the
//! installer-owned default directory.

mod download;
mod error;
mod location;

pub use download::install;
pub use error::{FailureReason, InstallError, SourceFailure};
pub use location::{resolve_location, LocationOrigin, SearchPaths};

use reqwest::Url;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{Environment, Settings};
use crate::error::ConfigError;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// What to install: a name and where to download it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    name: String,
    sources: Vec<Url>,
    install_dir: Option<PathBuf>,
}

impl ArtifactSpec {
    /// Creates a spec, validating the name and every source.
    pub fn new<I, S>(name: impl Into<String>, sources: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidName { name });
        }

        let sources = sources
            .into_iter()
            .map(|s| parse_source(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if sources.is_empty() {
            return Err(ConfigError::NoSources { name });
        }

        Ok(Self {
            name,
            sources,
            install_dir: None,
        })
    }

    /// Pins the install directory, bypassing search and the default.
    #[must_use]
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    /// Builds the spec from settings, honouring `NEAR_SANDBOX_BIN_PATH`.
    pub fn from_settings(settings: &Settings, env: &Environment) -> Result<Self, ConfigError> {
        let sources = settings.sources(env)?;

        if let Some(ref bin_path) = env.bin_path {
            let name = bin_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let spec = Self::new(name, sources)?;
            return Ok(match bin_path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => spec.with_install_dir(dir),
                _ => spec.with_install_dir("."),
            });
        }

        let spec = Self::new(settings.artifact.name.clone(), sources)?;
        Ok(spec)
    }

    /// Executable file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Download sources in priority order.
    pub fn sources(&self) -> &[Url] {
        &self.sources
    }

    /// Caller-supplied install directory, if any.
    pub fn install_dir(&self) -> Option<&Path> {
        self.install_dir.as_deref()
    }
}

fn parse_source(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::invalid_source(raw, e))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::invalid_source(
            raw,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// An artifact with its install directory resolved.
///
/// Presence on disk is never cached; every query hits the filesystem.
#[derive(Debug, Clone)]
pub struct Installation {
    name: String,
    sources: Vec<Url>,
    install_dir: PathBuf,
    managed_dir: PathBuf,
    origin: LocationOrigin,
}

impl Installation {
    /// Resolves the install directory for `spec`.
    pub async fn resolve(
        spec: &ArtifactSpec,
        search: &SearchPaths,
        managed_dir: &Path,
    ) -> Result<Self, InstallError> {
        let (install_dir, origin) =
            resolve_location(&spec.name, spec.install_dir(), search, managed_dir).await?;
        debug!(
            "Resolved {} to {} ({:?})",
            spec.name,
            install_dir.display(),
            origin
        );

        Ok(Self {
            name: spec.name.clone(),
            sources: spec.sources.clone(),
            install_dir,
            managed_dir: managed_dir.to_path_buf(),
            origin,
        })
    }

    /// Resolves from settings and the environment snapshot.
    pub async fn from_settings(
        settings: &Settings,
        env: &Environment,
    ) -> Result<Self, InstallError> {
        let spec = ArtifactSpec::from_settings(settings, env)?;
        let search = SearchPaths {
            priority: env.priority_dir.clone(),
            path_list: env.search_path.clone(),
        };
        Self::resolve(&spec, &search, &settings.managed_install_dir(env)).await
    }

    /// Path of the executable.
    pub fn bin_path(&self) -> PathBuf {
        self.install_dir.join(&self.name)
    }

    /// Directory holding the executable.
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// How the install directory was chosen.
    pub fn origin(&self) -> LocationOrigin {
        self.origin
    }

    /// Returns true if the executable lives in the installer-owned directory.
    pub fn is_managed(&self) -> bool {
        self.install_dir == self.managed_dir
    }

    /// Returns true if the executable is present as a regular file.
    pub async fn exists(&self) -> bool {
        exists(&self.bin_path()).await
    }

    /// Downloads the artifact, overwriting any existing copy.
    ///
    /// Sources whose archive lacks the executable are skipped.
    pub async fn install(&self) -> Result<Url, InstallError> {
        let source = install(&self.sources, &self.install_dir, &self.name).await?;
        make_executable(&self.bin_path()).await?;
        Ok(source)
    }

    /// Installs only if the executable is missing.
    pub async fn ensure_installed(&self) -> Result<PathBuf, InstallError> {
        let bin_path = self.bin_path();
        if !exists(&bin_path).await {
            info!("{} not found, installing", bin_path.display());
            self.install().await?;
        }
        Ok(bin_path)
    }

    /// Removes the executable if it lives in the managed directory and was
    /// not pinned by the caller.
    pub async fn uninstall(&self) -> Result<bool, InstallError> {
        if self.origin == LocationOrigin::Explicit {
            debug!(
                "{} was supplied explicitly, leaving it in place",
                self.bin_path().display()
            );
            return Ok(false);
        }
        uninstall(&self.bin_path(), &self.managed_dir).await
    }
}

/// Returns true iff `path` is a regular file. Never fails.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

/// Deletes `path` only when it lives directly in `managed_dir`.
///
/// Returns whether a file was removed. Fails if the file is still present
/// afterwards.
pub async fn uninstall(path: &Path, managed_dir: &Path) -> Result<bool, InstallError> {
    if path.parent() != Some(managed_dir) {
        debug!(
            "{} is not in the managed directory, leaving it in place",
            path.display()
        );
        return Ok(false);
    }

    if !exists(path).await {
        return Ok(false);
    }

    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
    if exists(path).await {
        return Err(InstallError::RemovalFailed {
            path: path.to_path_buf(),
        });
    }

    info!("Removed {}", path.display());
    Ok(true)
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| InstallError::io(format!("Failed to chmod {}", path.display()), e))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), InstallError> {
    Ok(())
}
