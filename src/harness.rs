//! Helpers for running test code against fresh sandbox instances.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use sandbox_harness::config::{Environment, Settings};
//! use sandbox_harness::harness::Harness;
//!
//! let settings = Settings::load(std::path::Path::new("."))?;
//! let harness = Harness::from_settings(&settings, &Environment::from_process()).await?;
//!
//! let template = harness
//!     .bootstrap(|sandbox| async move {
//!         // deploy contracts, create accounts...
//!         println!("bootstrapping {}", sandbox.rpc_addr);
//!         Ok(())
//!     })
//!     .await?;
//!
//! template
//!     .run(|sandbox| async move {
//!         println!("testing against {}", sandbox.rpc_addr);
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Environment, Settings};
use crate::error::ConfigError;
use crate::installer::Installation;
use crate::port::PortAllocator;
use crate::sandbox::{InstanceConfig, LaunchOptions, SandboxError, SandboxHandle, SandboxInstance};

/// Launches instances of one installed binary on distinct ports.
#[derive(Debug)]
pub struct Harness {
    binary: PathBuf,
    allocator: PortAllocator,
    options: LaunchOptions,
    debug: bool,
}

impl Harness {
    /// Uses an already installed `binary`.
    pub fn new(binary: impl Into<PathBuf>, settings: &Settings, env: &Environment) -> Self {
        Self {
            binary: binary.into(),
            allocator: PortAllocator::new(settings.port_range()),
            options: LaunchOptions::from_settings(&settings.instance, env),
            debug: env.debug,
        }
    }

    /// Resolves the binary and installs it if missing.
    pub async fn from_settings(settings: &Settings, env: &Environment) -> Result<Self> {
        let installation = Installation::from_settings(settings, env)
            .await
            .context("Failed to resolve sandbox binary")?;
        let binary = installation
            .ensure_installed()
            .await
            .context("Failed to install sandbox binary")?;
        info!("Using sandbox binary {}", binary.display());
        Ok(Self::new(binary, settings, env))
    }

    #[must_use]
    pub fn with_options(mut self, options: LaunchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// A default config on the next free port.
    pub fn config(&self) -> Result<InstanceConfig, ConfigError> {
        Ok(InstanceConfig::allocate(&self.allocator)?.with_debug_output(self.debug))
    }

    /// Prepares and starts an instance, closing it again if startup fails.
    pub async fn launch(&self, config: InstanceConfig) -> Result<SandboxInstance, SandboxError> {
        let mut instance = SandboxInstance::prepare(
            &self.binary,
            config,
            &self.allocator.range(),
            self.options.clone(),
        )
        .await?;

        if let Err(e) = instance.start().await {
            instance.close().await;
            return Err(e);
        }
        Ok(instance)
    }

    /// Runs `f` against a fresh instance and closes it afterwards, whatever
    /// `f` returns.
    pub async fn run<F, Fut, T>(&self, config: InstanceConfig, f: F) -> Result<T>
    where
        F: FnOnce(SandboxHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let port = config.port;
        let mut instance = self
            .launch(config)
            .await
            .with_context(|| format!("Failed to launch sandbox on port {port}"))?;

        let result = f(instance.handle()).await;
        instance.close().await;
        result
    }

    /// Runs `setup` once on a fresh instance and keeps its state as a
    /// template for later instances.
    pub async fn bootstrap<F, Fut>(&self, setup: F) -> Result<Template<'_>>
    where
        F: FnOnce(SandboxHandle) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let config = self.config()?;
        let reference_dir = config.home_dir.clone();
        self.run(config, setup)
            .await
            .context("Sandbox bootstrap failed")?;

        debug!("Bootstrapped template in {}", reference_dir.display());
        Ok(Template {
            harness: self,
            reference_dir,
        })
    }
}

/// State of a bootstrapped instance, cloned into every new instance.
#[derive(Debug)]
pub struct Template<'a> {
    harness: &'a Harness,
    reference_dir: PathBuf,
}

impl Template<'_> {
    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    /// Runs `f` against a new instance seeded from the template.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(SandboxHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self
            .harness
            .config()?
            .with_clone_source(&self.reference_dir)
            .with_init(false)
            .with_remove_on_close(true);
        self.harness.run(config, f).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{ArtifactSettings, InstanceSettings, ReadinessMode};
    use crate::test_support::{fake_sandbox, tarball};
    use reqwest::Url;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn settings(port_start: u16) -> Settings {
        Settings {
            instance: InstanceSettings {
                port_start,
                port_end: port_start + 49,
                readiness: ReadinessMode::LogMarker,
                startup_timeout_ms: 10_000,
                poll_interval_ms: 20,
                shutdown_grace_ms: 2_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn harness(dir: &Path, port_start: u16) -> Harness {
        Harness::new(fake_sandbox(dir), &settings(port_start), &Environment::default())
    }

    #[tokio::test]
    async fn test_config_allocates_distinct_ports() {
        let dir = tempdir().unwrap();
        let harness = harness(dir.path(), 4700);

        let a = harness.config().unwrap();
        let b = harness.config().unwrap();

        assert_eq!((a.port, a.network_port), (4700, 4701));
        assert_eq!((b.port, b.network_port), (4702, 4703));
        assert_ne!(a.home_dir, b.home_dir);
    }

    #[tokio::test]
    async fn test_debug_log_lands_in_overridden_home() {
        let dir = tempdir().unwrap();
        let env = Environment {
            debug: true,
            ..Default::default()
        };
        let harness = Harness::new(fake_sandbox(dir.path()), &settings(4720), &env);
        let work = dir.path().join("work");
        let config = harness.config().unwrap().with_home_dir(&work);

        let log = harness
            .run(config, |sandbox| async move { Ok(sandbox.home_dir.join("sandbox.log")) })
            .await
            .unwrap();

        assert_eq!(log, work.join("sandbox.log"));
        assert!(log.is_file());
    }

    #[tokio::test]
    async fn test_run_passes_handle_and_returns_result() {
        let dir = tempdir().unwrap();
        let harness = harness(dir.path(), 4750);
        let config = harness
            .config()
            .unwrap()
            .with_home_dir(dir.path().join("one"));

        let (port, key) = harness
            .run(config, |sandbox| async move {
                let key = fs::read_to_string(&sandbox.key_file)?;
                Ok((sandbox.port, key))
            })
            .await
            .unwrap();

        assert_eq!(port, 4750);
        assert!(key.contains("secret_key"));
    }

    #[tokio::test]
    async fn test_run_propagates_closure_error() {
        let dir = tempdir().unwrap();
        let harness = harness(dir.path(), 4800);
        let config = harness
            .config()
            .unwrap()
            .with_home_dir(dir.path().join("one"));

        let result: Result<()> = harness
            .run(config, |_| async { anyhow::bail!("assertion failed") })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "assertion failed");
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let dir = tempdir().unwrap();
        let harness = Harness::new(
            dir.path().join("missing"),
            &settings(4850),
            &Environment::default(),
        );
        let config = harness
            .config()
            .unwrap()
            .with_home_dir(dir.path().join("one"))
            .with_init(false);

        let err = harness.launch(config).await.unwrap_err();
        assert!(err.is_spawn());
    }

    #[tokio::test]
    async fn test_template_clones_bootstrapped_state() {
        let dir = tempdir().unwrap();
        let harness = harness(dir.path(), 4900);

        let template = harness
            .bootstrap(|sandbox| async move {
                fs::write(sandbox.home_dir.join("deployed"), "contract")?;
                Ok(())
            })
            .await
            .unwrap();
        let reference_key = fs::read_to_string(template.reference_dir().join("validator_key.json"))
            .unwrap();

        for _ in 0..2 {
            let (key, deployed, inits, home) = template
                .run(|sandbox| async move {
                    Ok((
                        fs::read_to_string(&sandbox.key_file)?,
                        fs::read_to_string(sandbox.home_dir.join("deployed"))?,
                        fs::read_to_string(sandbox.home_dir.join("init.count"))?,
                        sandbox.home_dir,
                    ))
                })
                .await
                .unwrap();

            assert_eq!(key, reference_key);
            assert_eq!(deployed, "contract");
            assert_eq!(inits.lines().count(), 1);
            assert_ne!(home, template.reference_dir());
        }

        fs::remove_dir_all(template.reference_dir()).unwrap();
    }

    #[tokio::test]
    async fn test_from_settings_installs_missing_binary() {
        let dir = tempdir().unwrap();
        let script = fs::read(fake_sandbox(dir.path())).unwrap();
        let archive = dir.path().join("near-sandbox.tar.gz");
        fs::write(&archive, tarball(&[("pkg/near-sandbox", &script)])).unwrap();
        let install_dir = dir.path().join("managed");

        let mut settings = settings(4950);
        settings.artifact = ArtifactSettings {
            sources: vec![Url::from_file_path(&archive).unwrap().to_string()],
            install_dir: Some(install_dir.clone()),
            ..Default::default()
        };

        let harness = Harness::from_settings(&settings, &Environment::default())
            .await
            .unwrap();

        assert_eq!(harness.binary(), install_dir.join("near-sandbox"));
        assert!(harness.binary().is_file());
        assert_eq!(harness.options().timing.interval, Duration::from_millis(20));
    }
}
