//! Sandbox instance lifecycle.
//!
//! Each instance owns a working directory and a port, runs the optional
//! initialization subcommand, starts the long-lived node process, waits
//! until it is ready and tears it down again on close.

mod config;
mod error;
mod instance;
mod workdir;

use std::fmt;

pub use config::{
    home_dir_for_port, InstanceConfig, LaunchOptions, NodeLimits, ReadinessStrategy, KEY_FILE,
    LOG_FILE, NODE_CONFIG_FILE,
};
pub use error::SandboxError;
pub use instance::{SandboxHandle, SandboxInstance};

/// Where an instance is in its life.
///
/// Transitions only move forward; `close` may jump to `Terminated` from
/// any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Created,
    Preparing,
    Initializing,
    Starting,
    Ready,
    Closing,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Preparing => "preparing",
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
