//! Install, launch and supervise disposable `near-sandbox` nodes.
//!
//! The crate has three layers:
//!
//! - [`installer`] makes sure the platform binary exists on disk,
//!   downloading it from a prioritized list of sources when missing.
//! - [`sandbox`] runs one node per port and working directory, waits for
//!   it to answer RPC requests ([`probe`]) and tears it down again.
//! - [`harness`] wraps both for integration tests: run a closure against a
//!   fresh node, or bootstrap once and clone the state into many nodes.
//!
//! Configuration comes from an optional `sandbox.toml` ([`config`]) with
//! environment variables layered on top.

pub mod config;
pub mod error;
pub mod harness;
pub mod installer;
pub mod platform;
pub mod port;
pub mod probe;
pub mod runner;
pub mod sandbox;
pub mod stdio;

#[cfg(test)]
mod test_support;

pub use config::{Environment, Settings};
pub use error::ConfigError;
pub use harness::{Harness, Template};
pub use installer::{ArtifactSpec, InstallError, Installation};
pub use port::{PortAllocator, PortRange};
pub use sandbox::{InstanceConfig, LaunchOptions, SandboxError, SandboxHandle, SandboxInstance};
pub use stdio::{StdioConfig, StreamTarget};
