//! Domain-specific error types for artifact installation.

use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Why a single candidate source failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Connection, TLS or other transport failure.
    Transport(String),
    /// Server answered with a non-success HTTP status.
    Status(u16),
    /// Local file source could not be read.
    Read(String),
    /// Downloaded bytes were not a valid gzip tarball.
    Archive(String),
    /// Writing into the target directory failed.
    Write(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Status(code) => write!(f, "HTTP status {code}"),
            Self::Read(msg) => write!(f, "read error: {msg}"),
            Self::Archive(msg) => write!(f, "archive error: {msg}"),
            Self::Write(msg) => write!(f, "write error: {msg}"),
        }
    }
}

/// A candidate source together with the reason it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_url: String,
    pub reason: FailureReason,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source_url, self.reason)
    }
}

/// Errors that can occur while installing or removing an artifact.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Artifact settings are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every candidate source failed.
    #[error("Failed to download from:\n{}", format_attempts(.attempts))]
    Download { attempts: Vec<SourceFailure> },

    /// The file still exists after removal.
    #[error("Failed to remove binary located at {}", path.display())]
    RemovalFailed { path: PathBuf },

    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn format_attempts(attempts: &[SourceFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl InstallError {
    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true if every download source failed.
    pub fn is_download(&self) -> bool {
        matches!(self, Self::Download { .. })
    }

    /// Sources attempted before giving up, in priority order.
    pub fn attempts(&self) -> &[SourceFailure] {
        match self {
            Self::Download { attempts } => attempts,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_lists_every_source() {
        let err = InstallError::Download {
            attempts: vec![
                SourceFailure {
                    source_url: "https://a.example.com/x.tar.gz".to_string(),
                    reason: FailureReason::Status(404),
                },
                SourceFailure {
                    source_url: "https://b.example.com/x.tar.gz".to_string(),
                    reason: FailureReason::Transport("connection refused".to_string()),
                },
            ],
        };
        assert!(err.is_download());
        assert_eq!(err.attempts().len(), 2);
        assert_eq!(
            err.to_string(),
            "Failed to download from:\n\
             https://a.example.com/x.tar.gz (HTTP status 404)\n\
             https://b.example.com/x.tar.gz (transport error: connection refused)"
        );
    }

    #[test]
    fn test_removal_failed_message() {
        let err = InstallError::RemovalFailed {
            path: PathBuf::from("/opt/near-sandbox"),
        };
        assert!(!err.is_download());
        assert!(err.attempts().is_empty());
        assert_eq!(
            err.to_string(),
            "Failed to remove binary located at /opt/near-sandbox"
        );
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: InstallError = ConfigError::NoSources {
            name: "near-sandbox".to_string(),
        }
        .into();
        assert!(!err.is_download());
        assert_eq!(
            err.to_string(),
            ConfigError::NoSources {
                name: "near-sandbox".to_string()
            }
            .to_string()
        );
    }
}
