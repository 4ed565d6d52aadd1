//! Runtime module - the seam to the container runtime.
//!
//! The supervisor never talks to Docker directly; it goes through the
//! [`ContainerRuntime`] trait so the same orchestration logic runs against
//! the Docker CLI in production and a scripted double in tests.

pub mod backend;
pub mod docker;

#[cfg(test)]
pub(crate) mod fake;

use crate::config::Config;
use std::sync::Arc;

// Re-exports for convenience
pub use backend::{ContainerRuntime, ContainerState, ExecOutput};
pub use docker::DockerRuntime;

/// Creates the container runtime described by the configuration.
pub fn create_runtime(config: &Config) -> Arc<dyn ContainerRuntime> {
    Arc::new(DockerRuntime::from_config(config))
}
