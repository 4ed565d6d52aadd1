//! Per-service supervision.
//!
//! A [`ServiceSupervisor`] owns the lifecycle state of exactly one service.
//! It is the only writer of that state; everyone else reads snapshots from
//! the watch channel or follows the [`StateEvent`] broadcast.

use crate::config::{RestartPolicy, RetryConfig, ServiceSpec};
use crate::error::{KumiError, Result};
use crate::probe::{Probe, ReadinessProbe};
use crate::runtime::{ContainerRuntime, ContainerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Declared, nothing done yet.
    Pending,
    /// Container launched, readiness not confirmed.
    Starting,
    /// Accepting requests.
    Ready,
    /// Running but failing its readiness check, or exited after being ready.
    Degraded,
    /// No container.
    Stopped,
    /// Launch or readiness failed.
    Failed,
}

impl ServiceState {
    /// Returns true when a launch is in progress or done.
    pub fn is_up(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Ready)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Pending => write!(f, "pending"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Ready => write!(f, "ready"),
            ServiceState::Degraded => write!(f, "degraded"),
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Failed => write!(f, "failed"),
        }
    }
}

/// A single state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub service: String,
    pub from: ServiceState,
    pub to: ServiceState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Point-in-time view of a supervised service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Service name.
    pub name: String,
    /// Container name.
    pub container: String,
    /// Current state.
    pub state: ServiceState,
    /// Restart policy.
    pub restart: RestartPolicy,
    /// Launch attempts made by the last start.
    pub attempts: u32,
    /// Direct dependencies.
    pub depends_on: Vec<String>,
    /// When the current state was entered.
    pub since: DateTime<Utc>,
    /// Last failure or degradation reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct Tracked {
    state: ServiceState,
    attempts: u32,
    since: DateTime<Utc>,
    last_error: Option<String>,
}

/// Supervisor for one service.
pub struct ServiceSupervisor {
    spec: Arc<ServiceSpec>,
    runtime: Arc<dyn ContainerRuntime>,
    retry: RetryConfig,
    state: watch::Sender<Tracked>,
    events: broadcast::Sender<StateEvent>,
    /// Serialises start and stop.
    op: Mutex<()>,
}

impl ServiceSupervisor {
    /// Creates a supervisor in the `Pending` state.
    pub fn new(
        spec: Arc<ServiceSpec>,
        runtime: Arc<dyn ContainerRuntime>,
        retry: RetryConfig,
        events: broadcast::Sender<StateEvent>,
    ) -> Self {
        let (state, _) = watch::channel(Tracked {
            state: ServiceState::Pending,
            attempts: 0,
            since: Utc::now(),
            last_error: None,
        });

        Self {
            spec,
            runtime,
            retry,
            state,
            events,
            op: Mutex::new(()),
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Service definition.
    pub fn spec(&self) -> &Arc<ServiceSpec> {
        &self.spec
    }

    /// Current state.
    pub fn state(&self) -> ServiceState {
        self.state.borrow().state
    }

    /// Snapshot of the service.
    pub fn status(&self) -> ServiceStatus {
        let tracked = self.state.borrow().clone();
        ServiceStatus {
            name: self.spec.name.clone(),
            container: self.spec.container().to_string(),
            state: tracked.state,
            restart: self.spec.restart,
            attempts: tracked.attempts,
            depends_on: self.spec.depends_on.clone(),
            since: tracked.since,
            last_error: tracked.last_error,
        }
    }

    /// Launches the service container.
    ///
    /// A no-op returning the current state when the service is already
    /// `Starting` or `Ready`. Concurrent callers are serialised. A running
    /// container left by an earlier process is adopted; a stale exited one
    /// is removed first. Failed launches are retried per the restart policy.
    /// On success the service is `Starting`; readiness is confirmed by the
    /// caller through [`ServiceSupervisor::mark_ready`].
    pub async fn start(&self, cancel: &CancellationToken) -> Result<ServiceState> {
        let _guard = self.op.lock().await;

        let current = self.state();
        if current.is_up() {
            debug!(service = %self.spec.name, state = %current, "Start is a no-op");
            return Ok(current);
        }

        match self.launch_with_retry(cancel).await {
            Ok(state) => Ok(state),
            Err(e) => {
                self.transition(ServiceState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn launch_with_retry(&self, cancel: &CancellationToken) -> Result<ServiceState> {
        self.state.send_modify(|t| t.attempts = 0);
        self.transition(ServiceState::Starting, None);

        match self.runtime.inspect(&self.spec).await? {
            ContainerState::Running => {
                info!(
                    service = %self.spec.name,
                    container = %self.spec.container(),
                    "Adopting running container"
                );
                return Ok(ServiceState::Starting);
            }
            ContainerState::Exited { exit_code } => {
                info!(
                    service = %self.spec.name,
                    exit_code = ?exit_code,
                    "Removing stale container"
                );
                self.runtime.remove(&self.spec).await?;
            }
            ContainerState::Missing => {}
        }

        let max_attempts = self.spec.restart.launch_attempts(&self.retry);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(KumiError::cancelled(format!("start of {}", self.spec.name)));
            }

            attempt += 1;
            self.state.send_modify(|t| t.attempts = attempt);
            info!(
                service = %self.spec.name,
                image = %self.spec.image,
                attempt,
                max_attempts,
                "Launching service"
            );

            let err = match self.runtime.launch(&self.spec).await {
                Ok(()) => return Ok(ServiceState::Starting),
                Err(e) => e,
            };

            warn!(service = %self.spec.name, attempt, error = %err, "Launch failed");
            self.transition(ServiceState::Failed, Some(err.to_string()));

            if attempt >= max_attempts {
                if let Err(e) = self.runtime.remove(&self.spec).await {
                    warn!(service = %self.spec.name, error = %e, "Failed to clean up after launch");
                }
                return Err(match err {
                    KumiError::Launch {
                        service, message, ..
                    } => KumiError::Launch {
                        service,
                        message,
                        attempts: attempt,
                    },
                    other => other,
                });
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                service = %self.spec.name,
                delay_ms = delay.as_millis() as u64,
                "Backing off before next launch"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(KumiError::cancelled(format!("start of {}", self.spec.name)));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // A failed run can leave a created container holding the name.
            self.runtime.remove(&self.spec).await?;
            self.transition(
                ServiceState::Starting,
                Some(format!("retry {}/{}", attempt + 1, max_attempts)),
            );
        }
    }

    /// Stops and removes the service container.
    pub async fn stop(&self) -> Result<ServiceState> {
        let _guard = self.op.lock().await;

        info!(service = %self.spec.name, container = %self.spec.container(), "Stopping service");
        if let Err(e) = self.runtime.remove(&self.spec).await {
            self.transition(ServiceState::Failed, Some(e.to_string()));
            return Err(e);
        }
        self.transition(ServiceState::Stopped, None);
        Ok(ServiceState::Stopped)
    }

    /// Container state reported by the runtime.
    pub async fn container_state(&self) -> Result<ContainerState> {
        self.runtime.inspect(&self.spec).await
    }

    /// Derives the state of an existing container, for a process that did
    /// not launch it.
    pub async fn observe(&self, probe: &dyn Probe, waiter: &ReadinessProbe) -> Result<ServiceState> {
        let _guard = self.op.lock().await;

        let state = match self.runtime.inspect(&self.spec).await? {
            ContainerState::Running => {
                if waiter.check_once(probe).await {
                    self.transition(ServiceState::Ready, None);
                } else {
                    self.transition(
                        ServiceState::Degraded,
                        Some(format!("{} is not passing", probe.describe())),
                    );
                }
                self.state()
            }
            ContainerState::Exited { exit_code } => {
                let message = match exit_code {
                    Some(code) => format!("container exited with code {}", code),
                    None => "container exited".to_string(),
                };
                self.transition(ServiceState::Failed, Some(message));
                ServiceState::Failed
            }
            ContainerState::Missing => {
                self.transition(ServiceState::Stopped, None);
                ServiceState::Stopped
            }
        };

        debug!(service = %self.spec.name, state = %state, "Observed service");
        Ok(state)
    }

    /// Records that the readiness probe passed.
    pub fn mark_ready(&self) {
        self.transition(ServiceState::Ready, None);
    }

    /// Records that a running service stopped answering or exited.
    pub fn mark_degraded(&self, reason: impl Into<String>) {
        self.transition(ServiceState::Degraded, Some(reason.into()));
    }

    /// Records a failure detected outside of launch.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.transition(ServiceState::Failed, Some(reason.into()));
    }

    fn transition(&self, to: ServiceState, message: Option<String>) {
        let now = Utc::now();
        let mut event = None;

        self.state.send_modify(|t| {
            if matches!(to, ServiceState::Failed | ServiceState::Degraded) && message.is_some() {
                t.last_error = message.clone();
            }
            if t.state != to {
                event = Some(StateEvent {
                    service: self.spec.name.clone(),
                    from: t.state,
                    to,
                    at: now,
                    message: message.clone(),
                });
                t.state = to;
                t.since = now;
            }
        });

        if let Some(event) = event {
            info!(
                service = %event.service,
                from = %event.from,
                to = %event.to,
                message = event.message.as_deref().unwrap_or(""),
                "Service state changed"
            );
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}
