//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::path::PathBuf;
use std::time::Duration;

use super::LifecycleState;
use crate::error::ConfigError;

/// Errors that can occur while preparing or starting a sandbox instance.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Instance configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Working directory setup failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The OS could not execute the sandbox binary.
    #[error("Failed to spawn {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The instance did not answer within the readiness timeout.
    #[error("Sandbox on port {port} did not become ready within {timeout_ms} ms")]
    ReadinessTimeout { port: u16, timeout_ms: u64 },

    /// The process exited while readiness was being awaited.
    #[error("Sandbox on port {port} exited before becoming ready: {status}")]
    ExitedEarly { port: u16, status: String },

    /// The diagnostic stream ended without a readiness marker.
    #[error("Sandbox on port {port} closed its output before reporting readiness")]
    MarkerStreamClosed { port: u16 },

    /// The requested transition is not valid from the current state.
    #[error("Sandbox on port {port} cannot do that while {state}")]
    InvalidState { port: u16, state: LifecycleState },
}

impl SandboxError {
    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Spawn` error.
    pub fn spawn(binary: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Spawn {
            binary: binary.into(),
            source,
        }
    }

    /// Creates a `ReadinessTimeout` error from a `Duration`.
    pub fn readiness_timeout(port: u16, timeout: Duration) -> Self {
        Self::ReadinessTimeout {
            port,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if this is a readiness timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. })
    }

    /// Returns true if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if the binary could not be executed.
    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}
