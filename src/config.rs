//! Settings file and environment configuration.
//!
//! Settings come from an optional `sandbox.toml` in the project directory,
//! with every field defaulted. Environment variables are captured once into
//! an [`Environment`] snapshot and layered on top when artifacts and
//! instances are configured.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::platform;
use crate::port::{PortRange, DEFAULT_PORT_END, DEFAULT_PORT_START};

const CONFIG_FILE: &str = "sandbox.toml";

/// Full path to an existing sandbox executable.
pub const ENV_BIN_PATH: &str = "NEAR_SANDBOX_BIN_PATH";
/// Overrides the managed default install directory.
pub const ENV_INSTALL_DIR: &str = "NEAR_SANDBOX_BINARY_PATH";
/// Extra download sources, prepended to the candidate list.
pub const ENV_ARTIFACT_URL: &str = "SANDBOX_ARTIFACT_URL";
/// Directory searched first when locating an installed executable.
pub const ENV_PRIORITY_DIR: &str = "LOCAL_BINARY_PATH";
/// Enables debug logging and subprocess log files.
pub const ENV_DEBUG: &str = "SANDBOX_DEBUG";
/// Forwarded to the sandbox process as `RUST_LOG`.
pub const ENV_CHILD_LOG: &str = "NEAR_SANDBOX_LOG";
/// Forwarded to the sandbox process as `RUST_LOG_STYLE`.
pub const ENV_CHILD_LOG_STYLE: &str = "NEAR_SANDBOX_LOG_STYLE";
/// Lets the sandbox process log at its own default level unless `0`.
pub const ENV_ENABLE_CHILD_LOG: &str = "NEAR_ENABLE_SANDBOX_LOG";
/// JSON-RPC payload limit written into the node config.
pub const ENV_MAX_PAYLOAD_SIZE: &str = "NEAR_SANDBOX_MAX_PAYLOAD_SIZE";
/// Open file limit written into the node config.
pub const ENV_MAX_OPEN_FILES: &str = "NEAR_SANDBOX_MAX_FILES";

/// `RUST_LOG` for sandbox processes when their logging is not enabled.
pub const QUIET_CHILD_LOG: &str = "near=error,stats=error,network=error";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub artifact: ArtifactSettings,
    #[serde(default)]
    pub instance: InstanceSettings,
}

/// Which artifact to install and where to get it from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Executable file name inside the install directory
    #[serde(default = "default_name")]
    pub name: String,

    /// Release used to build the default download URL
    #[serde(default = "default_version")]
    pub version: String,

    /// Download sources in priority order
    /// - Empty: the platform default URL for `version`
    #[serde(default)]
    pub sources: Vec<String>,

    /// Managed default install directory (default: ~/.near/sandbox)
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            sources: Vec::new(),
            install_dir: None,
        }
    }
}

/// How readiness of a started instance is detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessMode {
    /// Poll the JSON-RPC endpoint.
    #[default]
    Network,
    /// Scan the process's stderr for a known marker.
    LogMarker,
}

/// Per-instance launch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSettings {
    #[serde(default = "default_port_start")]
    pub port_start: u16,

    #[serde(default = "default_port_end")]
    pub port_end: u16,

    /// Readiness timeout in milliseconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Extra wait after readiness before the instance is handed out
    #[serde(default)]
    pub settle_delay_ms: u64,

    /// How long `close` waits for the process to exit before killing it
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub readiness: ReadinessMode,

    /// Markers searched for when `readiness = "log-marker"`
    #[serde(default = "default_log_markers")]
    pub log_markers: Vec<String>,

    /// Arguments of the initialization subcommand
    #[serde(default = "default_init_args")]
    pub init_args: Vec<String>,

    /// JSON-RPC payload limit in bytes (overrides the environment)
    #[serde(default)]
    pub max_payload_size: Option<usize>,

    /// Open file limit of the node's store (overrides the environment)
    #[serde(default)]
    pub max_open_files: Option<usize>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            port_start: default_port_start(),
            port_end: default_port_end(),
            startup_timeout_ms: default_startup_timeout(),
            poll_interval_ms: default_poll_interval(),
            settle_delay_ms: 0,
            shutdown_grace_ms: default_shutdown_grace(),
            readiness: ReadinessMode::default(),
            log_markers: default_log_markers(),
            init_args: default_init_args(),
            max_payload_size: None,
            max_open_files: None,
        }
    }
}

// Default value functions
fn default_name() -> String {
    "near-sandbox".to_string()
}

fn default_version() -> String {
    platform::DEFAULT_VERSION.to_string()
}

fn default_port_start() -> u16 {
    DEFAULT_PORT_START
}

fn default_port_end() -> u16 {
    DEFAULT_PORT_END
}

fn default_startup_timeout() -> u64 {
    20_000
}

fn default_poll_interval() -> u64 {
    250
}

fn default_shutdown_grace() -> u64 {
    5_000
}

fn default_log_markers() -> Vec<String> {
    vec![
        "Server listening at ed25519".to_string(),
        " stats: ".to_string(),
    ]
}

fn default_init_args() -> Vec<String> {
    vec!["init".to_string()]
}

impl Settings {
    /// Load settings from `sandbox.toml`, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::invalid_settings(&config_path, e))?;

        toml::from_str(&content).map_err(|e| ConfigError::invalid_settings(&config_path, e))
    }

    /// Candidate sources in priority order: environment extras, then the
    /// configured list or the platform default.
    pub fn sources(&self, env: &Environment) -> Result<Vec<String>, ConfigError> {
        let mut sources = env.extra_sources.clone();
        if self.artifact.sources.is_empty() {
            let platform = platform::current_platform()?;
            sources.push(platform::artifact_url(platform, &self.artifact.version));
        } else {
            sources.extend(self.artifact.sources.iter().cloned());
        }
        Ok(sources)
    }

    /// The install directory owned by the installer.
    pub fn managed_install_dir(&self, env: &Environment) -> PathBuf {
        env.default_install_dir
            .clone()
            .or_else(|| self.artifact.install_dir.clone())
            .unwrap_or_else(default_install_dir)
    }

    /// Administrative port range for instances.
    pub fn port_range(&self) -> PortRange {
        PortRange::new(self.instance.port_start, self.instance.port_end)
    }
}

/// `~/.near/sandbox`, or a temp directory when no home is available.
pub fn default_install_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".near")
        .join("sandbox")
}

/// Snapshot of the environment variables the harness reads.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// `NEAR_SANDBOX_BIN_PATH`
    pub bin_path: Option<PathBuf>,
    /// `NEAR_SANDBOX_BINARY_PATH`
    pub default_install_dir: Option<PathBuf>,
    /// `SANDBOX_ARTIFACT_URL`, split on commas and whitespace
    pub extra_sources: Vec<String>,
    /// `LOCAL_BINARY_PATH`
    pub priority_dir: Option<PathBuf>,
    /// `PATH`
    pub search_path: Option<OsString>,
    /// `SANDBOX_DEBUG`
    pub debug: bool,
    /// `NEAR_SANDBOX_LOG`
    pub child_log: Option<String>,
    /// `NEAR_SANDBOX_LOG_STYLE`
    pub child_log_style: Option<String>,
    /// `NEAR_ENABLE_SANDBOX_LOG`
    pub enable_child_log: bool,
    /// `NEAR_SANDBOX_MAX_PAYLOAD_SIZE`
    pub max_payload_size: Option<usize>,
    /// `NEAR_SANDBOX_MAX_FILES`
    pub max_open_files: Option<usize>,
}

impl Environment {
    /// Reads the current process environment.
    pub fn from_process() -> Self {
        Self {
            bin_path: non_empty_path(ENV_BIN_PATH),
            default_install_dir: non_empty_path(ENV_INSTALL_DIR),
            extra_sources: std::env::var(ENV_ARTIFACT_URL)
                .map(|v| split_sources(&v))
                .unwrap_or_default(),
            priority_dir: non_empty_path(ENV_PRIORITY_DIR),
            search_path: std::env::var_os("PATH"),
            debug: std::env::var(ENV_DEBUG).is_ok_and(|v| is_truthy(&v)),
            child_log: std::env::var(ENV_CHILD_LOG).ok(),
            child_log_style: std::env::var(ENV_CHILD_LOG_STYLE).ok(),
            enable_child_log: std::env::var(ENV_ENABLE_CHILD_LOG).is_ok_and(|v| v != "0"),
            max_payload_size: parse_var(ENV_MAX_PAYLOAD_SIZE),
            max_open_files: parse_var(ENV_MAX_OPEN_FILES),
        }
    }

    /// Log variables to set on spawned sandbox processes.
    ///
    /// Without `NEAR_SANDBOX_LOG`, the node is kept quiet unless
    /// `NEAR_ENABLE_SANDBOX_LOG` is set.
    pub fn child_log_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(ref val) = self.child_log {
            vars.push(("RUST_LOG".to_string(), val.clone()));
        } else if !self.enable_child_log {
            vars.push(("RUST_LOG".to_string(), QUIET_CHILD_LOG.to_string()));
        }
        if let Some(ref val) = self.child_log_style {
            vars.push(("RUST_LOG_STYLE".to_string(), val.clone()));
        }
        vars
    }
}

fn non_empty_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Unparseable values are ignored.
fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn split_sources(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
