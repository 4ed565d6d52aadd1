//! Container runtime trait and common types.
//!
//! This module defines the `ContainerRuntime` trait that the supervisor
//! drives, along with the types it reports back. The runtime itself (device
//! isolation, networking, image pulls) is an external collaborator.

use crate::config::ServiceSpec;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Container state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ContainerState {
    /// Container exists and is running.
    Running,
    /// Container exists but is not running.
    Exited {
        /// Exit code of the main process, when known.
        exit_code: Option<i32>,
    },
    /// No container with that name exists.
    Missing,
}

impl ContainerState {
    /// Returns true when the container is running.
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited {
                exit_code: Some(code),
            } => write!(f, "exited ({})", code),
            ContainerState::Exited { exit_code: None } => write!(f, "exited"),
            ContainerState::Missing => write!(f, "missing"),
        }
    }
}

/// Output of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecOutput {
    /// Creates an exec output.
    pub fn new(exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Returns true when the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for container runtimes.
///
/// Implementations create, inspect and remove the container that backs a
/// service. `launch` reports device acquisition and runtime failures as
/// [`crate::error::KumiError::Launch`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the name of this runtime.
    fn name(&self) -> &'static str;

    /// Makes sure the named network exists.
    async fn ensure_network(&self, network: &str) -> Result<()>;

    /// Creates and starts the container for a service.
    async fn launch(&self, spec: &ServiceSpec) -> Result<()>;

    /// Stops and removes the container for a service. Missing is not an error.
    async fn remove(&self, spec: &ServiceSpec) -> Result<()>;

    /// Reports the current container state.
    async fn inspect(&self, spec: &ServiceSpec) -> Result<ContainerState>;

    /// Runs a command inside the service's container.
    async fn exec(&self, spec: &ServiceSpec, argv: &[String], timeout: Duration)
        -> Result<ExecOutput>;

    /// Removes a named volume. Missing is not an error.
    async fn remove_volume(&self, volume: &str) -> Result<()>;
}
