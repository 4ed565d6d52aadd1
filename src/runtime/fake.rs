//! Scripted in-memory runtime used by supervisor and controller tests.

use crate::config::ServiceSpec;
use crate::error::{KumiError, Result};
use crate::runtime::backend::{ContainerRuntime, ContainerState, ExecOutput};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureNetwork(String),
    Launch(String),
    Remove(String),
    Inspect(String),
    Exec(String, Vec<String>),
    RemoveVolume(String),
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, ContainerState>,
    launch_failures: HashMap<String, u32>,
    launch_delays: HashMap<String, Duration>,
    exec_scripts: HashMap<String, VecDeque<ExecOutput>>,
    exec_defaults: HashMap<String, ExecOutput>,
    calls: Vec<Call>,
}

/// In-memory runtime. Containers launch instantly and keep running until
/// removed, unless scripted otherwise.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` launches of `service` fail.
    pub fn fail_launches(&self, service: &str, count: u32) {
        self.lock().launch_failures.insert(service.to_string(), count);
    }

    /// Every launch of `service` takes `delay`.
    pub fn delay_launch(&self, service: &str, delay: Duration) {
        self.lock().launch_delays.insert(service.to_string(), delay);
    }

    /// Forces the observed container state of `service`.
    pub fn set_state(&self, service: &str, state: ContainerState) {
        self.lock().containers.insert(service.to_string(), state);
    }

    /// Queues exec results for `service`, consumed in order.
    pub fn push_exec(&self, service: &str, outputs: impl IntoIterator<Item = ExecOutput>) {
        self.lock()
            .exec_scripts
            .entry(service.to_string())
            .or_default()
            .extend(outputs);
    }

    /// Exec result returned for `service` once its queue is empty.
    pub fn set_exec_default(&self, service: &str, output: ExecOutput) {
        self.lock().exec_defaults.insert(service.to_string(), output);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Services launched, in call order.
    pub fn launches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Launch(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Services removed, in call order.
    pub fn removals(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Remove(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Commands executed inside `service`.
    pub fn execs(&self, service: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec(name, argv) if name == service => Some(argv),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ensure_network(&self, network: &str) -> Result<()> {
        self.lock().calls.push(Call::EnsureNetwork(network.to_string()));
        Ok(())
    }

    async fn launch(&self, spec: &ServiceSpec) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(Call::Launch(spec.name.clone()));
            state.launch_delays.get(&spec.name).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(remaining) = state.launch_failures.get_mut(&spec.name) {
            if *remaining > 0 {
                *remaining -= 1;
                state.containers.insert(
                    spec.name.clone(),
                    ContainerState::Exited {
                        exit_code: Some(125),
                    },
                );
                return Err(KumiError::launch(
                    &spec.name,
                    "could not select device driver \"\" with capabilities: [[gpu]]",
                ));
            }
        }
        state
            .containers
            .insert(spec.name.clone(), ContainerState::Running);
        Ok(())
    }

    async fn remove(&self, spec: &ServiceSpec) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::Remove(spec.name.clone()));
        state.containers.remove(&spec.name);
        Ok(())
    }

    async fn inspect(&self, spec: &ServiceSpec) -> Result<ContainerState> {
        let mut state = self.lock();
        state.calls.push(Call::Inspect(spec.name.clone()));
        Ok(state
            .containers
            .get(&spec.name)
            .cloned()
            .unwrap_or(ContainerState::Missing))
    }

    async fn exec(
        &self,
        spec: &ServiceSpec,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<ExecOutput> {
        let mut state = self.lock();
        state
            .calls
            .push(Call::Exec(spec.name.clone(), argv.to_vec()));

        if !matches!(state.containers.get(&spec.name), Some(ContainerState::Running)) {
            return Ok(ExecOutput::new(
                Some(1),
                format!("Error response from daemon: container {} is not running", spec.name),
            ));
        }

        if let Some(output) = state
            .exec_scripts
            .get_mut(&spec.name)
            .and_then(VecDeque::pop_front)
        {
            return Ok(output);
        }
        Ok(state
            .exec_defaults
            .get(&spec.name)
            .cloned()
            .unwrap_or_else(|| ExecOutput::new(Some(0), "")))
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        self.lock().calls.push(Call::RemoveVolume(volume.to_string()));
        Ok(())
    }
}
