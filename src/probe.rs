//! Readiness detection for started sandbox instances.
//!
//! The canonical probe posts a fixed JSON-RPC `status` request to the
//! instance every poll interval until it answers HTTP 200. Every other
//! outcome counts as "not ready yet" and is retried silently until the
//! timeout (plus a short grace) has elapsed.
//!
//! Scanning the process's stderr for a marker line is available as an
//! explicit fallback only; it ties correctness to the binary's log format.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::sandbox::SandboxError;

/// Default readiness timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);
/// Default delay between probe attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Extra time allowed past the timeout before giving up.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

/// Timing of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTiming {
    pub timeout: Duration,
    pub interval: Duration,
    pub grace: Duration,
}

impl Default for ProbeTiming {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            grace: DEFAULT_GRACE,
        }
    }
}

impl ProbeTiming {
    /// Default cadence with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    fn deadline(&self) -> Duration {
        self.timeout + self.grace
    }
}

/// A single readiness attempt.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Returns true if the instance answered successfully.
    async fn check(&self) -> bool;
}

/// Posts a JSON-RPC `status` request and expects HTTP 200.
#[derive(Debug, Clone)]
pub struct RpcStatusCheck {
    client: reqwest::Client,
    url: String,
}

impl RpcStatusCheck {
    /// Probes the instance listening on `port` on the loopback interface.
    pub fn new(port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://127.0.0.1:{port}"),
        }
    }
}

#[async_trait]
impl ReadinessCheck for RpcStatusCheck {
    async fn check(&self) -> bool {
        let request = json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "method": "status",
            "params": [],
        });

        match self.client.post(&self.url).json(&request).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                trace!("{} answered {}", self.url, response.status());
                false
            }
            Err(e) => {
                trace!("{} not reachable yet: {}", self.url, e);
                false
            }
        }
    }
}

/// Waits until the instance on `port` answers the status request.
pub async fn await_ready(port: u16, timeout: Duration) -> Result<(), SandboxError> {
    poll_until_ready(
        &RpcStatusCheck::new(port),
        port,
        ProbeTiming::with_timeout(timeout),
    )
    .await
}

/// Repeats `check` at the configured cadence until it succeeds.
pub async fn poll_until_ready(
    check: &dyn ReadinessCheck,
    port: u16,
    timing: ProbeTiming,
) -> Result<(), SandboxError> {
    let started = Instant::now();
    let deadline = started + timing.deadline();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        // A single hung request must not outlive the overall deadline.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let ready = tokio::time::timeout(remaining.max(timing.interval), check.check())
            .await
            .unwrap_or(false);

        if ready {
            debug!(
                "Sandbox on port {} ready after {} attempts ({:?})",
                port,
                attempts,
                started.elapsed()
            );
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(SandboxError::readiness_timeout(port, timing.timeout));
        }
        tokio::time::sleep(timing.interval).await;
    }
}

/// Scans `stream` line by line until one contains any of `markers`.
///
/// After a match, the rest of the stream is drained in the background so
/// the process never blocks on a full pipe.
pub async fn await_marker<R>(
    stream: R,
    markers: &[String],
    port: u16,
    timing: ProbeTiming,
) -> Result<(), SandboxError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let markers = markers.to_vec();
    let scan = async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    trace!("[{}] {}", port, line);
                    if markers.iter().any(|m| line.contains(m.as_str())) {
                        tokio::spawn(async move {
                            while let Ok(Some(line)) = lines.next_line().await {
                                trace!("[{}] {}", port, line);
                            }
                        });
                        return Ok(());
                    }
                }
                Ok(None) | Err(_) => return Err(SandboxError::MarkerStreamClosed { port }),
            }
        }
    };

    match tokio::time::timeout(timing.deadline(), scan).await {
        Ok(result) => result,
        Err(_) => Err(SandboxError::readiness_timeout(port, timing.timeout)),
    }
}
