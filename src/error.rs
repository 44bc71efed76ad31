//! Configuration errors shared by every subsystem.
//!
//! These are raised at construction time, before any filesystem,
//! network or process work happens.

use std::path::PathBuf;

/// Invalid configuration detected before any I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Artifact name is empty or contains a path separator.
    #[error("Invalid artifact name '{name}': must be a non-empty file name")]
    InvalidName { name: String },

    /// No candidate download source was provided.
    #[error("No download source provided for artifact '{name}'")]
    NoSources { name: String },

    /// A candidate source could not be parsed as a supported URL.
    #[error("Invalid download source '{source_url}': {reason}")]
    InvalidSource { source_url: String, reason: String },

    /// The host OS/architecture pair has no published artifact.
    #[error("Unsupported platform: {os} {arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// A port lies outside the administrative range.
    #[error("Port {port} is out of range, expected {start}-{end}")]
    PortOutOfRange { port: u16, start: u16, end: u16 },

    /// The network port would collide with the RPC port.
    #[error("Port {port} cannot serve both RPC and network traffic")]
    PortConflict { port: u16 },

    /// Every port of the range has already been handed out.
    #[error("Port range {start}-{end} is exhausted")]
    PortsExhausted { start: u16, end: u16 },

    /// The settings file could not be read or parsed.
    #[error("Invalid settings file {}: {message}", path.display())]
    InvalidSettings { path: PathBuf, message: String },
}

impl ConfigError {
    /// Creates an `InvalidSource` error.
    pub fn invalid_source(source_url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSource {
            source_url: source_url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `InvalidSettings` error.
    pub fn invalid_settings(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::InvalidSettings {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this is a port range violation.
    pub fn is_port_out_of_range(&self) -> bool {
        matches!(self, Self::PortOutOfRange { .. })
    }
}
