//! A single supervised sandbox process.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use super::config::{InstanceConfig, LaunchOptions, ReadinessStrategy};
use super::{workdir, LifecycleState, SandboxError};
use crate::port::PortRange;
use crate::probe::{await_marker, poll_until_ready, RpcStatusCheck};

/// What a caller needs to talk to a ready instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub port: u16,
    pub rpc_addr: String,
    pub home_dir: PathBuf,
    pub key_file: PathBuf,
}

/// A sandbox node bound to one port and one working directory.
///
/// Dropping an instance without closing it kills the process but leaves
/// the working directory behind.
#[derive(Debug)]
pub struct SandboxInstance {
    binary: PathBuf,
    config: InstanceConfig,
    options: LaunchOptions,
    state: LifecycleState,
    child: Option<Child>,
}

impl SandboxInstance {
    /// Validates `config` and sets up its working directory.
    ///
    /// With a clone source the directory is replaced by a copy of it.
    /// Otherwise, with `init` set, the directory is wiped and the
    /// initialization subcommand runs; a failing initialization is logged
    /// and does not abort.
    pub async fn prepare(
        binary: impl Into<PathBuf>,
        config: InstanceConfig,
        range: &PortRange,
        options: LaunchOptions,
    ) -> Result<Self, SandboxError> {
        config.validate(range)?;

        let mut instance = Self {
            binary: binary.into(),
            config,
            options,
            state: LifecycleState::Created,
            child: None,
        };
        instance.state = LifecycleState::Preparing;

        let home = instance.config.home().to_path_buf();
        if let Some(source) = instance.config.clone_from.clone() {
            workdir::clone_dir(&source, &home).await?;
        } else {
            if instance.config.init {
                workdir::clear(&home).await?;
            }
            tokio::fs::create_dir_all(&home).await.map_err(|e| {
                SandboxError::io(format!("Failed to create {}", home.display()), e)
            })?;
            if instance.config.init {
                instance.state = LifecycleState::Initializing;
                instance.run_init().await;
                workdir::patch_node_config(&home, &instance.options.limits.config_patch())
                    .await?;
            }
        }

        Ok(instance)
    }

    async fn run_init(&self) {
        let mut cmd = self.command();
        cmd.args(&self.options.init_args);

        let status = match self.route_output(&mut cmd, false) {
            Ok(()) => cmd.status().await,
            Err(e) => Err(e),
        };

        match status {
            Ok(status) if status.success() => {
                debug!("Initialized {}", self.config.home_dir.display());
            }
            Ok(status) => error!(
                "Initializing {} with {} failed: {}",
                self.config.home_dir.display(),
                self.binary.display(),
                status
            ),
            Err(e) => error!(
                "Failed to run {} to initialize {}: {}",
                self.binary.display(),
                self.config.home_dir.display(),
                e
            ),
        }
    }

    /// Spawns the node and waits until it is ready.
    ///
    /// On failure the process (if any) stays attached so `close` can reap it.
    pub async fn start(&mut self) -> Result<(), SandboxError> {
        if !matches!(
            self.state,
            LifecycleState::Preparing | LifecycleState::Initializing
        ) {
            return Err(SandboxError::InvalidState {
                port: self.config.port,
                state: self.state,
            });
        }
        self.state = LifecycleState::Starting;

        let port = self.config.port;
        let markers = match &self.options.readiness {
            ReadinessStrategy::Network => None,
            ReadinessStrategy::LogMarker(markers) => Some(markers.clone()),
        };

        let mut cmd = self.command();
        cmd.arg("run")
            .arg("--rpc-addr")
            .arg(self.config.listen_addr())
            .arg("--network-addr")
            .arg(self.config.network_addr());
        self.route_output(&mut cmd, markers.is_some())
            .map_err(|e| SandboxError::io("Failed to open sandbox output", e))?;

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::spawn(&self.binary, e))?;
        info!(
            "Started sandbox on port {} (pid {:?}) in {}",
            port,
            child.id(),
            self.config.home_dir.display()
        );

        let timing = self.options.timing;
        let result = match markers {
            None => {
                let check = RpcStatusCheck::new(port);
                until_ready_or_exit(&mut child, port, poll_until_ready(&check, port, timing)).await
            }
            Some(markers) => match child.stderr.take() {
                Some(stderr) => {
                    until_ready_or_exit(
                        &mut child,
                        port,
                        await_marker(stderr, &markers, port, timing),
                    )
                    .await
                }
                None => Err(SandboxError::MarkerStreamClosed { port }),
            },
        };
        self.child = Some(child);
        result?;

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        self.state = LifecycleState::Ready;
        info!("Sandbox ready at {}", self.rpc_addr());
        Ok(())
    }

    /// Stops the process and optionally removes the working directory.
    ///
    /// Never fails; problems are logged. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.state == LifecycleState::Terminated {
            return;
        }
        self.state = LifecycleState::Closing;

        if let Some(mut child) = self.child.take() {
            stop(&mut child, self.config.port, self.options.shutdown_grace).await;
        }

        if self.config.remove_on_close {
            let dir = self.config.home_dir.clone();
            tokio::spawn(async move {
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => debug!("Removed {}", dir.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
                }
            });
        }

        self.state = LifecycleState::Terminated;
        debug!("Sandbox on port {} terminated", self.config.port);
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn home_dir(&self) -> &Path {
        &self.config.home_dir
    }

    /// `http://localhost:<port>`
    pub fn rpc_addr(&self) -> String {
        format!("http://localhost:{}", self.config.port)
    }

    pub fn key_file(&self) -> PathBuf {
        self.config.key_file()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Process id while a child is attached and has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn handle(&self) -> SandboxHandle {
        SandboxHandle {
            port: self.port(),
            rpc_addr: self.rpc_addr(),
            home_dir: self.config.home_dir.clone(),
            key_file: self.key_file(),
        }
    }

    /// `<bin> --home <dir>` with the child log environment applied.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--home")
            .arg(&self.config.home_dir)
            .envs(self.options.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn route_output(&self, cmd: &mut Command, capture_stderr: bool) -> io::Result<()> {
        let (stdout, stderr) = self.config.output_targets();
        cmd.stdout(stdout.to_output()?);
        if capture_stderr {
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stderr(stderr.to_output()?);
        }
        Ok(())
    }
}

/// Runs `probe` but bails out as soon as the child exits.
async fn until_ready_or_exit<F>(child: &mut Child, port: u16, probe: F) -> Result<(), SandboxError>
where
    F: Future<Output = Result<(), SandboxError>>,
{
    tokio::select! {
        result = probe => result,
        status = child.wait() => match status {
            Ok(status) => Err(SandboxError::ExitedEarly {
                port,
                status: status.to_string(),
            }),
            Err(e) => Err(SandboxError::io(
                format!("Failed to wait for sandbox on port {port}"),
                e,
            )),
        },
    }
}

async fn stop(child: &mut Child, port: u16, grace: Duration) {
    if let Err(e) = interrupt(child) {
        warn!(
            "Failed to signal sandbox on port {} (pid {:?}): {}",
            port,
            child.id(),
            e
        );
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("Sandbox on port {} exited: {}", port, status),
        Ok(Err(e)) => warn!("Failed to reap sandbox on port {}: {}", port, e),
        Err(_) => {
            warn!(
                "Sandbox on port {} still running after {:?}, killing it",
                port, grace
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill sandbox on port {}: {}", port, e);
            }
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("process already exited"))?;
    let pid = i32::try_from(pid).map_err(io::Error::other)?;
    kill(Pid::from_raw(pid), Signal::SIGINT).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
