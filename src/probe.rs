//! Readiness probing.
//!
//! A [`Probe`] answers one question once: is the service accepting requests
//! right now? [`ReadinessProbe`] turns that into a bounded wait that polls at
//! a fixed interval, gives up at a deadline and stops early when cancelled.

use crate::config::{ProbeSpec, ServiceSpec, TimeoutConfig};
use crate::error::{KumiError, Result};
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A single liveness check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true when the target is ready.
    async fn check(&self) -> bool;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// HTTP GET probe. Ready on a 2xx response, or on `expect_status` if set.
pub struct HttpProbe {
    client: Client,
    url: String,
    expect_status: Option<u16>,
}

impl HttpProbe {
    /// Creates an HTTP probe whose requests time out after `attempt_timeout`.
    pub fn new(
        url: impl Into<String>,
        expect_status: Option<u16>,
        attempt_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(|e| KumiError::runtime_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            url: url.into(),
            expect_status,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                match self.expect_status {
                    Some(expected) => status.as_u16() == expected,
                    None => status.is_success(),
                }
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "HTTP probe failed");
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

/// TCP connect probe.
pub struct TcpProbe {
    address: String,
    attempt_timeout: Duration,
}

impl TcpProbe {
    /// Creates a TCP probe for `host:port`.
    pub fn new(address: impl Into<String>, attempt_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            attempt_timeout,
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.attempt_timeout, TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        )
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.address)
    }
}

/// Runs a command inside the service container; exit code 0 means ready.
pub struct ExecProbe {
    runtime: Arc<dyn ContainerRuntime>,
    spec: Arc<ServiceSpec>,
    argv: Vec<String>,
    attempt_timeout: Duration,
}

impl ExecProbe {
    /// Creates an exec probe from a shell-style command line.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        spec: Arc<ServiceSpec>,
        command: &str,
        attempt_timeout: Duration,
    ) -> Result<Self> {
        let argv = shell_words::split(command).map_err(|e| {
            KumiError::config(format!(
                "services.{}.readiness: cannot parse command '{}': {}",
                spec.name, command, e
            ))
        })?;
        if argv.is_empty() {
            return Err(KumiError::config(format!(
                "services.{}.readiness: empty command",
                spec.name
            )));
        }

        Ok(Self {
            runtime,
            spec,
            argv,
            attempt_timeout,
        })
    }
}

#[async_trait]
impl Probe for ExecProbe {
    async fn check(&self) -> bool {
        match self
            .runtime
            .exec(&self.spec, &self.argv, self.attempt_timeout)
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(service = %self.spec.name, error = %e, "Exec probe failed");
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("exec {}", self.argv.join(" "))
    }
}

/// Ready when the runtime reports the container running.
pub struct RunningProbe {
    runtime: Arc<dyn ContainerRuntime>,
    spec: Arc<ServiceSpec>,
}

impl RunningProbe {
    /// Creates a running-state probe.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, spec: Arc<ServiceSpec>) -> Self {
        Self { runtime, spec }
    }
}

#[async_trait]
impl Probe for RunningProbe {
    async fn check(&self) -> bool {
        self.runtime
            .inspect(&self.spec)
            .await
            .map(|state| state.is_running())
            .unwrap_or(false)
    }

    fn describe(&self) -> String {
        format!("container {} running", self.spec.container())
    }
}

/// Builds the probe declared for a service.
pub fn build_probe(
    spec: &Arc<ServiceSpec>,
    runtime: Arc<dyn ContainerRuntime>,
    attempt_timeout: Duration,
) -> Result<Arc<dyn Probe>> {
    let probe: Arc<dyn Probe> = match &spec.readiness {
        ProbeSpec::Running => Arc::new(RunningProbe::new(runtime, spec.clone())),
        ProbeSpec::Http { url, expect_status } => {
            Arc::new(HttpProbe::new(url.clone(), *expect_status, attempt_timeout)?)
        }
        ProbeSpec::Tcp { address } => Arc::new(TcpProbe::new(address.clone(), attempt_timeout)),
        ProbeSpec::Exec { command } => Arc::new(ExecProbe::new(
            runtime,
            spec.clone(),
            command,
            attempt_timeout,
        )?),
    };
    Ok(probe)
}

/// Polls a probe until it succeeds, the deadline passes, or the wait is cancelled.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    interval: Duration,
    attempt_timeout: Duration,
}

impl ReadinessProbe {
    /// Creates a readiness waiter with a fixed poll interval.
    pub fn new(interval: Duration, attempt_timeout: Duration) -> Self {
        Self {
            interval,
            attempt_timeout,
        }
    }

    /// Creates a readiness waiter from timeout configuration.
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(config.probe_interval(), config.probe_attempt())
    }

    /// Runs one probe attempt, bounded by the attempt timeout.
    pub async fn check_once(&self, probe: &dyn Probe) -> bool {
        tokio::time::timeout(self.attempt_timeout, probe.check())
            .await
            .unwrap_or(false)
    }

    /// Waits until `probe` reports ready.
    ///
    /// Fails with [`KumiError::Timeout`] once `timeout` has elapsed, never
    /// before, and with [`KumiError::Cancelled`] as soon as `cancel` fires.
    pub async fn wait_until_ready(
        &self,
        service: &str,
        probe: &dyn Probe,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts: u32 = 0;

        info!(
            service = %service,
            probe = %probe.describe(),
            timeout_secs = timeout.as_secs(),
            "Waiting for service readiness"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(KumiError::cancelled(format!("readiness of {}", service)));
            }

            attempts += 1;
            let ready = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(KumiError::cancelled(format!("readiness of {}", service)));
                }
                ready = self.check_once(probe) => ready,
            };

            if ready {
                info!(
                    service = %service,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Service is ready"
                );
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(service = %service, attempts, "Service did not become ready in time");
                return Err(KumiError::Timeout {
                    operation: format!("readiness of {}", service),
                    seconds: timeout.as_secs(),
                });
            }

            debug!(service = %service, attempts, "Service not ready yet");

            let wait = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(KumiError::cancelled(format!("readiness of {}", service)));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
