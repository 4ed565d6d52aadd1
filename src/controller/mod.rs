//! Controller module - Whole-stack orchestration.
//!
//! The [`StackController`] composes the dependency graph, one
//! [`ServiceSupervisor`] per service, the readiness probes and the model
//! provisioner. It drives startup in dependency order, starting independent
//! services concurrently, and tears down everything it launched, in reverse
//! launch order, when any step of a start fails or is cancelled.


use crate::config::Config;
use crate::error::{KumiError, Result};
use crate::graph::DependencyGraph;
use crate::probe::{build_probe, Probe, ReadinessProbe};
use crate::provision::{ModelProvisioner, ModelReport};
use crate::runtime::ContainerRuntime;
use crate::supervisor::{ServiceState, ServiceStatus, ServiceSupervisor, StateEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Number of state events kept for `status`.
const EVENT_HISTORY: usize = 64;

/// Lifecycle state of the whole stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for StackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StackState::Uninitialized => "uninitialized",
            StackState::Starting => "starting",
            StackState::Running => "running",
            StackState::Stopping => "stopping",
            StackState::Stopped => "stopped",
            StackState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Machine-readable snapshot of the stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackStatus {
    /// Project name.
    pub project: String,
    /// Stack state.
    pub state: StackState,
    /// When the stack entered its current state.
    pub since: DateTime<Utc>,
    /// Reason for the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Services in start order.
    pub services: Vec<ServiceStatus>,
    /// Services launched by the last start, in launch order.
    pub launch_order: Vec<String>,
    /// Most recent service transitions, oldest first.
    pub events: Vec<StateEvent>,
}

#[derive(Debug, Clone)]
struct Tracked {
    state: StackState,
    since: DateTime<Utc>,
    last_error: Option<String>,
}

struct EventLog {
    rx: broadcast::Receiver<StateEvent>,
    recent: VecDeque<StateEvent>,
}

/// Orchestrates the whole stack.
pub struct StackController {
    project: String,
    graph: DependencyGraph,
    runtime: Arc<dyn ContainerRuntime>,
    supervisors: HashMap<String, Arc<ServiceSupervisor>>,
    probes: HashMap<String, Arc<dyn Probe>>,
    networks: Vec<String>,
    volumes: Vec<String>,
    waiter: ReadinessProbe,
    readiness_timeout: Duration,
    provisioner: ModelProvisioner,
    models: Vec<(String, String)>,
    state: watch::Sender<Tracked>,
    /// Services launched by the current start, in launch order.
    launched: Arc<StdMutex<Vec<String>>>,
    events: broadcast::Sender<StateEvent>,
    log: StdMutex<EventLog>,
    /// Cancels the start in progress, if any.
    starting: StdMutex<Option<CancellationToken>>,
    /// Serialises start, stop and reconcile.
    op: Mutex<()>,
}

impl StackController {
    /// Builds a controller for the configured stack.
    pub fn new(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let graph = DependencyGraph::new(&config.services)?;
        let (events, rx) = broadcast::channel(256);

        let mut supervisors = HashMap::with_capacity(config.services.len());
        let mut probes = HashMap::with_capacity(config.services.len());
        let mut networks = Vec::new();
        let mut volumes = Vec::new();

        for spec in &config.services {
            let spec = Arc::new(spec.clone());
            let probe = build_probe(&spec, runtime.clone(), config.timeout.probe_attempt())?;
            probes.insert(spec.name.clone(), probe);

            if !networks.contains(&spec.network) {
                networks.push(spec.network.clone());
            }
            for volume in spec.named_volumes() {
                if !volumes.iter().any(|v| v == volume) {
                    volumes.push(volume.to_string());
                }
            }

            supervisors.insert(
                spec.name.clone(),
                Arc::new(ServiceSupervisor::new(
                    spec,
                    runtime.clone(),
                    config.retry.clone(),
                    events.clone(),
                )),
            );
        }

        let (state, _) = watch::channel(Tracked {
            state: StackState::Uninitialized,
            since: Utc::now(),
            last_error: None,
        });

        Ok(Self {
            project: config.project.clone(),
            graph,
            runtime: runtime.clone(),
            supervisors,
            probes,
            networks,
            volumes,
            waiter: ReadinessProbe::from_config(&config.timeout),
            readiness_timeout: config.timeout.readiness(),
            provisioner: ModelProvisioner::from_config(runtime, config),
            models: config
                .models
                .ensure
                .iter()
                .map(|m| (m.service.clone(), m.id.clone()))
                .collect(),
            state,
            launched: Arc::new(StdMutex::new(Vec::new())),
            events,
            log: StdMutex::new(EventLog {
                rx,
                recent: VecDeque::with_capacity(EVENT_HISTORY),
            }),
            starting: StdMutex::new(None),
            op: Mutex::new(()),
        })
    }

    /// Current stack state.
    pub fn state(&self) -> StackState {
        self.state.borrow().state
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Subscribes to service state events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Returns the supervisor for a service.
    pub fn supervisor(&self, name: &str) -> Result<&Arc<ServiceSupervisor>> {
        self.supervisors
            .get(name)
            .ok_or_else(|| KumiError::ServiceNotFound {
                service: name.to_string(),
            })
    }

    /// Snapshot of one service.
    pub fn service_status(&self, name: &str) -> Result<ServiceStatus> {
        Ok(self.supervisor(name)?.status())
    }

    /// Snapshot of the whole stack.
    pub fn status(&self) -> StackStatus {
        let tracked = self.state.borrow().clone();
        let services = self
            .graph
            .start_order()
            .iter()
            .filter_map(|name| self.supervisors.get(name))
            .map(|sup| sup.status())
            .collect();

        StackStatus {
            project: self.project.clone(),
            state: tracked.state,
            since: tracked.since,
            last_error: tracked.last_error,
            services,
            launch_order: self.launch_order(),
            events: self.recent_events(),
        }
    }

    /// Derives service and stack state from the runtime.
    ///
    /// Used by a process that did not start the stack itself.
    pub async fn observe(&self) -> Result<StackStatus> {
        let _guard = self.op.lock().await;
        self.observe_services().await?;
        self.derive_state();
        Ok(self.status())
    }

    /// Starts the stack.
    ///
    /// Services start in dependency order; independent services start
    /// concurrently. Configured models are provisioned once every service is
    /// ready. On any failure, including cancellation, the stack becomes
    /// `Failed` and every service launched by this call is torn down in
    /// reverse launch order. Calling this on a running stack launches
    /// nothing.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<StackStatus> {
        let _guard = self.op.lock().await;

        if self.state() == StackState::Uninitialized {
            self.observe_services().await?;
        }
        if self.all_ready() {
            info!(project = %self.project, "Stack is already running");
            self.set_state(StackState::Running, None);
            return Ok(self.status());
        }

        info!(project = %self.project, order = ?self.graph.start_order(), "Starting stack");
        self.set_state(StackState::Starting, None);
        self.lock_launched().clear();

        let run = cancel.child_token();
        *self.lock_starting() = Some(run.clone());

        let mut result = self.start_services(&run).await;
        if result.is_ok() {
            result = self.ensure_configured_models(&run).await;
        }
        self.lock_starting().take();

        match result {
            Ok(()) => {
                info!(project = %self.project, "Stack is running");
                self.set_state(StackState::Running, None);
                Ok(self.status())
            }
            Err(e) => {
                error!(project = %self.project, error = %e, "Stack start failed");
                self.set_state(StackState::Failed, Some(e.to_string()));
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Stops every service in reverse dependency order.
    ///
    /// A start in progress is cancelled first and tears down what it
    /// launched. With `purge_volumes`, the named volumes declared by the
    /// services are removed afterwards.
    pub async fn stop(&self, purge_volumes: bool) -> Result<StackStatus> {
        if let Some(run) = self.lock_starting().as_ref() {
            info!(project = %self.project, "Cancelling stack start");
            run.cancel();
        }
        let _guard = self.op.lock().await;

        info!(project = %self.project, purge_volumes, "Stopping stack");
        self.set_state(StackState::Stopping, None);

        let mut first_error = None;
        for name in self.graph.stop_order() {
            let Some(sup) = self.supervisors.get(&name) else {
                continue;
            };
            if let Err(e) = sup.stop().await {
                error!(service = %name, error = %e, "Failed to stop service");
                first_error.get_or_insert(e);
            }
        }
        self.lock_launched().clear();

        if purge_volumes && first_error.is_none() {
            for volume in &self.volumes {
                if let Err(e) = self.runtime.remove_volume(volume).await {
                    error!(volume = %volume, error = %e, "Failed to remove volume");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => {
                self.set_state(StackState::Stopped, None);
                Ok(self.status())
            }
            Some(e) => {
                self.set_state(StackState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Ensures a model exists inside a ready service.
    ///
    /// A failure here does not tear the stack down.
    pub async fn ensure_model(
        &self,
        service: &str,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<ModelReport> {
        let sup = self.supervisor(service)?.clone();

        if self.state() == StackState::Uninitialized {
            let _guard = self.op.lock().await;
            self.observe_services().await?;
            self.derive_state();
        }

        self.provisioner.ensure_model(&sup, model, cancel).await
    }

    /// Re-checks a running stack against the runtime.
    ///
    /// Ready services whose container is gone become `Degraded` and are
    /// relaunched when their restart policy allows it. Degraded services
    /// that answer again become `Ready`. A service is only relaunched or
    /// marked `Ready` once all of its dependencies are `Ready`; services are
    /// visited in start order so a dependency recovered in the same pass
    /// counts. Returns the relaunched services.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let Ok(_guard) = self.op.try_lock() else {
            debug!("Skipping reconcile, another operation is running");
            return Ok(Vec::new());
        };
        if self.state() != StackState::Running {
            return Ok(Vec::new());
        }

        let mut relaunched = Vec::new();
        for name in self.graph.start_order() {
            let (Some(sup), Some(probe)) = (self.supervisors.get(name), self.probes.get(name))
            else {
                continue;
            };

            let state = sup.state();
            if !matches!(state, ServiceState::Ready | ServiceState::Degraded) {
                continue;
            }

            let container = sup.container_state().await?;
            let deps_ready = self.dependencies_ready(name);
            if container.is_running() {
                if state == ServiceState::Degraded
                    && deps_ready
                    && self.waiter.check_once(probe.as_ref()).await
                {
                    sup.mark_ready();
                }
                continue;
            }

            if state == ServiceState::Ready {
                warn!(service = %name, container = %container, "Container is no longer running");
                sup.mark_degraded(format!("container {}", container));
            }
            if !sup.spec().restart.relaunch_on_exit() {
                continue;
            }
            if !deps_ready {
                debug!(service = %name, "Dependencies not ready, leaving service degraded");
                continue;
            }

            info!(service = %name, "Relaunching service");
            let outcome = bring_up(
                sup.clone(),
                probe.clone(),
                self.waiter.clone(),
                self.readiness_timeout,
                cancel.clone(),
                None,
            )
            .await;
            match outcome {
                Ok(()) => relaunched.push(name.clone()),
                Err(e) => warn!(service = %name, error = %e, "Relaunch failed"),
            }
        }

        Ok(relaunched)
    }

    async fn start_services(&self, cancel: &CancellationToken) -> Result<()> {
        for network in &self.networks {
            self.runtime.ensure_network(network).await?;
        }

        let mut pending: Vec<String> = self
            .graph
            .start_order()
            .iter()
            .filter(|name| {
                self.supervisors
                    .get(*name)
                    .is_some_and(|s| s.state() != ServiceState::Ready)
            })
            .cloned()
            .collect();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();
        let step = cancel.child_token();
        let mut failure: Option<KumiError> = None;

        loop {
            if failure.is_none() && cancel.is_cancelled() {
                failure = Some(KumiError::cancelled(format!("start of {}", self.project)));
                step.cancel();
            }

            if failure.is_none() {
                for name in &pending {
                    if in_flight.contains(name) || !self.dependencies_ready(name) {
                        continue;
                    }
                    let (Some(sup), Some(probe)) =
                        (self.supervisors.get(name), self.probes.get(name))
                    else {
                        continue;
                    };

                    debug!(service = %name, "Dependencies ready, starting service");
                    in_flight.insert(name.clone());
                    let fut = bring_up(
                        sup.clone(),
                        probe.clone(),
                        self.waiter.clone(),
                        self.readiness_timeout,
                        step.clone(),
                        Some(self.launched.clone()),
                    );
                    let name = name.clone();
                    tasks.spawn(async move { (name, fut.await) });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((name, Ok(()))) => {
                    in_flight.remove(&name);
                    pending.retain(|p| p != &name);
                }
                Ok((name, Err(e))) => {
                    in_flight.remove(&name);
                    if failure.is_none() {
                        failure = Some(e);
                        step.cancel();
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(KumiError::runtime_with_source("Service task failed", e));
                        step.cancel();
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if !pending.is_empty() {
            return Err(KumiError::runtime(format!(
                "services could not be started: {}",
                pending.join(", ")
            )));
        }
        Ok(())
    }

    async fn ensure_configured_models(&self, cancel: &CancellationToken) -> Result<()> {
        for (service, model) in &self.models {
            let sup = self.supervisor(service)?;
            let report = self.provisioner.ensure_model(sup, model, cancel).await?;
            info!(
                service = %report.service,
                model = %report.model,
                already_present = report.already_present,
                "Model ready"
            );
        }
        Ok(())
    }

    /// Removes every service launched by the current start, newest first.
    async fn teardown(&self) {
        let order: Vec<String> = self.lock_launched().iter().rev().cloned().collect();
        if order.is_empty() {
            return;
        }

        warn!(project = %self.project, order = ?order, "Tearing down launched services");
        for name in order {
            let Some(sup) = self.supervisors.get(&name) else {
                continue;
            };
            if let Err(e) = sup.stop().await {
                error!(service = %name, error = %e, "Teardown failed for service");
            }
        }
    }

    async fn observe_services(&self) -> Result<()> {
        for name in self.graph.start_order() {
            if let (Some(sup), Some(probe)) = (self.supervisors.get(name), self.probes.get(name)) {
                sup.observe(probe.as_ref(), &self.waiter).await?;
            }
        }
        Ok(())
    }

    /// Sets the stack state from freshly observed service states.
    fn derive_state(&self) {
        let states: Vec<(String, ServiceState)> = self
            .graph
            .start_order()
            .iter()
            .filter_map(|n| self.supervisors.get(n).map(|s| (n.clone(), s.state())))
            .collect();

        if states.iter().all(|(_, s)| *s == ServiceState::Stopped) {
            self.set_state(StackState::Stopped, None);
        } else if states
            .iter()
            .all(|(_, s)| matches!(s, ServiceState::Ready | ServiceState::Degraded))
        {
            self.set_state(StackState::Running, None);
        } else {
            let down: Vec<String> = states
                .iter()
                .filter(|(_, s)| !matches!(s, ServiceState::Ready | ServiceState::Degraded))
                .map(|(n, s)| format!("{} is {}", n, s))
                .collect();
            self.set_state(StackState::Failed, Some(down.join(", ")));
        }
    }

    fn dependencies_ready(&self, name: &str) -> bool {
        self.graph.dependencies(name).iter().all(|dep| {
            self.supervisors
                .get(*dep)
                .is_some_and(|s| s.state() == ServiceState::Ready)
        })
    }

    fn all_ready(&self) -> bool {
        self.supervisors
            .values()
            .all(|s| s.state() == ServiceState::Ready)
    }

    fn launch_order(&self) -> Vec<String> {
        self.lock_launched().clone()
    }

    fn lock_launched(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.launched.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_starting(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.starting.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn recent_events(&self) -> Vec<StateEvent> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match log.rx.try_recv() {
                Ok(event) => {
                    if log.recent.len() == EVENT_HISTORY {
                        log.recent.pop_front();
                    }
                    log.recent.push_back(event);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Dropped old state events");
                }
                Err(_) => break,
            }
        }
        log.recent.iter().cloned().collect()
    }

    fn set_state(&self, to: StackState, last_error: Option<String>) {
        self.state.send_modify(|t| {
            if t.state != to {
                info!(project = %self.project, from = %t.state, to = %to, "Stack state changed");
                t.state = to;
                t.since = Utc::now();
            }
            if to == StackState::Failed {
                t.last_error = last_error;
            } else if to == StackState::Running {
                t.last_error = None;
            }
        });
    }
}

/// Launches one service and waits for it to become ready.
///
/// A successful launch is appended to `launched` before readiness is
/// awaited, so a service that never becomes ready is still torn down.
async fn bring_up(
    sup: Arc<ServiceSupervisor>,
    probe: Arc<dyn Probe>,
    waiter: ReadinessProbe,
    timeout: Duration,
    cancel: CancellationToken,
    launched: Option<Arc<StdMutex<Vec<String>>>>,
) -> Result<()> {
    let before = sup.state();
    sup.start(&cancel).await?;

    if let Some(launched) = launched {
        let mut order = launched.lock().unwrap_or_else(|e| e.into_inner());
        if !order.iter().any(|n| n == sup.name()) {
            order.push(sup.name().to_string());
        }
    }

    if before == ServiceState::Ready {
        return Ok(());
    }

    match waiter
        .wait_until_ready(sup.name(), probe.as_ref(), timeout, &cancel)
        .await
    {
        Ok(()) => {
            sup.mark_ready();
            Ok(())
        }
        Err(e) => {
            sup.mark_failed(e.to_string());
            Err(e)
        }
    }
}
