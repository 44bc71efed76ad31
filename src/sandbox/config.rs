//! Per-instance configuration and launch options.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{Environment, InstanceSettings, ReadinessMode};
use crate::error::ConfigError;
use crate::port::{PortAllocator, PortRange};
use crate::probe::{ProbeTiming, DEFAULT_GRACE};
use crate::stdio::StreamTarget;

/// Key material generated by initialization, read by RPC clients to sign
/// as the instance's root account.
pub const KEY_FILE: &str = "validator_key.json";

/// Process output file used when debug output is enabled.
pub const LOG_FILE: &str = "sandbox.log";

/// Node configuration written by initialization.
pub const NODE_CONFIG_FILE: &str = "config.json";

/// Distance between an RPC port and its derived network port.
pub const NETWORK_PORT_OFFSET: u16 = 1000;

pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_OPEN_FILES: usize = 3000;

/// `<temp>/sandbox/<port>`
pub fn home_dir_for_port(port: u16) -> PathBuf {
    std::env::temp_dir().join("sandbox").join(port.to_string())
}

/// Immutable description of one sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Working directory holding the node's state
    pub home_dir: PathBuf,

    /// RPC port
    pub port: u16,

    /// Peer-to-peer port
    pub network_port: u16,

    /// Run the initialization subcommand (ignored when cloning)
    pub init: bool,

    /// Delete `home_dir` after close
    pub remove_on_close: bool,

    /// Directory whose contents seed `home_dir`
    pub clone_from: Option<PathBuf>,

    pub stdout: StreamTarget,
    pub stderr: StreamTarget,

    /// Send both streams to `<home_dir>/sandbox.log`, overriding the targets
    pub debug_output: bool,
}

impl InstanceConfig {
    /// Defaults for `port`: derived home directory and network port,
    /// initialize, keep state.
    pub fn for_port(port: u16) -> Self {
        let network_port = port
            .checked_add(NETWORK_PORT_OFFSET)
            .unwrap_or(port - NETWORK_PORT_OFFSET);
        Self {
            home_dir: home_dir_for_port(port),
            port,
            network_port,
            init: true,
            remove_on_close: false,
            clone_from: None,
            stdout: StreamTarget::Discard,
            stderr: StreamTarget::Discard,
            debug_output: false,
        }
    }

    /// Defaults for the next two ports of `allocator` (RPC, then network).
    pub fn allocate(allocator: &PortAllocator) -> Result<Self, ConfigError> {
        let port = allocator.allocate()?;
        let network_port = allocator.allocate()?;
        Ok(Self::for_port(port).with_network_port(network_port))
    }

    #[must_use]
    pub fn with_network_port(mut self, port: u16) -> Self {
        self.network_port = port;
        self
    }

    #[must_use]
    pub fn with_home_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_init(mut self, init: bool) -> Self {
        self.init = init;
        self
    }

    #[must_use]
    pub fn with_remove_on_close(mut self, remove: bool) -> Self {
        self.remove_on_close = remove;
        self
    }

    /// Seeds the working directory from `dir` instead of initializing.
    #[must_use]
    pub fn with_clone_source(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clone_from = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_output(mut self, stdout: StreamTarget, stderr: StreamTarget) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Sends stdout and stderr to `<home_dir>/sandbox.log` when `enabled`.
    ///
    /// The path follows the final home directory.
    #[must_use]
    pub fn with_debug_output(mut self, enabled: bool) -> Self {
        self.debug_output = enabled;
        self
    }

    /// Effective targets for stdout and stderr.
    pub fn output_targets(&self) -> (StreamTarget, StreamTarget) {
        if self.debug_output {
            let log = self.log_file();
            (StreamTarget::File(log.clone()), StreamTarget::File(log))
        } else {
            (self.stdout.clone(), self.stderr.clone())
        }
    }

    /// `<home_dir>/validator_key.json`
    pub fn key_file(&self) -> PathBuf {
        self.home_dir.join(KEY_FILE)
    }

    /// `<home_dir>/sandbox.log`
    pub fn log_file(&self) -> PathBuf {
        self.home_dir.join(LOG_FILE)
    }

    /// Checks the RPC port against the administrative range.
    pub fn validate(&self, range: &PortRange) -> Result<(), ConfigError> {
        range.validate(self.port)?;
        if self.network_port == self.port {
            return Err(ConfigError::PortConflict { port: self.port });
        }
        Ok(())
    }

    /// RPC listen address passed to the node.
    pub(crate) fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Network listen address passed to the node.
    pub(crate) fn network_addr(&self) -> String {
        format!("127.0.0.1:{}", self.network_port)
    }

    pub(crate) fn home(&self) -> &Path {
        &self.home_dir
    }
}

/// How readiness is detected after spawning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadinessStrategy {
    /// JSON-RPC status polling.
    #[default]
    Network,
    /// Stderr scanning for any of the markers.
    LogMarker(Vec<String>),
}

/// Limits merged into the node's `config.json` after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLimits {
    /// JSON-RPC payload limit in bytes
    pub max_payload_size: usize,
    /// Open file limit of the store
    pub max_open_files: usize,
}

impl Default for NodeLimits {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

impl NodeLimits {
    /// Settings first, then the environment, then defaults.
    pub fn from_settings(settings: &InstanceSettings, env: &Environment) -> Self {
        Self {
            max_payload_size: settings
                .max_payload_size
                .or(env.max_payload_size)
                .unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE),
            max_open_files: settings
                .max_open_files
                .or(env.max_open_files)
                .unwrap_or(DEFAULT_MAX_OPEN_FILES),
        }
    }

    /// Merge patch for `config.json`.
    pub fn config_patch(&self) -> Value {
        json!({
            "rpc": {
                "limits_config": {
                    "json_payload_max_size": self.max_payload_size,
                },
            },
            "store": {
                "max_open_files": self.max_open_files,
            },
        })
    }
}

/// Timing and process options shared by every instance of a harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub timing: ProbeTiming,
    /// Wait after readiness before the instance counts as ready
    pub settle_delay: Duration,
    /// How long close waits for exit before killing
    pub shutdown_grace: Duration,
    pub readiness: ReadinessStrategy,
    /// Arguments of the initialization subcommand
    pub init_args: Vec<String>,
    /// Extra environment for spawned processes
    pub env: Vec<(String, String)>,
    pub limits: NodeLimits,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_settings(&InstanceSettings::default(), &Environment::default())
    }
}

impl LaunchOptions {
    /// Builds options from the `[instance]` settings and the environment.
    pub fn from_settings(settings: &InstanceSettings, env: &Environment) -> Self {
        let readiness = match settings.readiness {
            ReadinessMode::Network => ReadinessStrategy::Network,
            ReadinessMode::LogMarker => ReadinessStrategy::LogMarker(settings.log_markers.clone()),
        };

        Self {
            timing: ProbeTiming {
                timeout: Duration::from_millis(settings.startup_timeout_ms),
                interval: Duration::from_millis(settings.poll_interval_ms),
                grace: DEFAULT_GRACE,
            },
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
            readiness,
            init_args: settings.init_args.clone(),
            env: env.child_log_vars(),
            limits: NodeLimits::from_settings(settings, env),
        }
    }
}
