//! Model provisioning inside a ready backend service.

use crate::config::{render_command, Config, ModelsConfig};
use crate::error::{KumiError, Result};
use crate::runtime::{ContainerRuntime, ExecOutput};
use crate::supervisor::{ServiceState, ServiceSupervisor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exit codes meaning the command itself could not run.
const NOT_EXECUTABLE: i32 = 126;
const NOT_FOUND: i32 = 127;

/// Result of a successful `ensure_model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReport {
    /// Service the model lives in.
    pub service: String,
    /// Model identifier.
    pub model: String,
    /// True when the artifact was already present.
    pub already_present: bool,
    /// Pull attempts made.
    pub attempts: u32,
}

/// Ensures model artifacts exist inside backend services.
pub struct ModelProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    config: ModelsConfig,
    command_timeout: Duration,
}

impl ModelProvisioner {
    /// Creates a provisioner.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: ModelsConfig,
        command_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            config,
            command_timeout,
        }
    }

    /// Creates a provisioner from configuration.
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        Self::new(
            runtime,
            config.models.clone(),
            Duration::from_secs(config.timeout.model_seconds),
        )
    }

    /// Makes sure `model` is available inside the supervised service.
    ///
    /// The service must be `Ready`. A crash-class exit (non-zero, or killed
    /// by a signal) counts as one unstable attempt; after
    /// `models.max_attempts` of them this returns
    /// [`KumiError::ModelUnstable`] and leaves the choice of a smaller model
    /// to the caller. Exit codes 126 and 127 mean the command cannot run in
    /// that image and fail immediately.
    pub async fn ensure_model(
        &self,
        supervisor: &ServiceSupervisor,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<ModelReport> {
        let service = supervisor.name();
        let model = model.trim();
        validate_model_id(model)?;

        let state = supervisor.state();
        if state != ServiceState::Ready {
            return Err(KumiError::invalid_request(format!(
                "Service '{}' is {}; models can only be provisioned on a ready service",
                service, state
            )));
        }

        if let Some(check) = &self.config.check_command {
            let argv = command_argv(check, model)?;
            let output = self.run(supervisor, &argv, cancel).await?;
            if output.success() {
                info!(service = %service, model = %model, "Model already present");
                return Ok(ModelReport {
                    service: service.to_string(),
                    model: model.to_string(),
                    already_present: true,
                    attempts: 0,
                });
            }
            debug!(service = %service, model = %model, "Model not present, pulling");
        }

        let argv = command_argv(&self.config.pull_command, model)?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_exit_code = None;

        for attempt in 1..=max_attempts {
            info!(service = %service, model = %model, attempt, max_attempts, "Provisioning model");

            let output = self.run(supervisor, &argv, cancel).await?;
            match output.exit_code {
                Some(0) => {
                    info!(service = %service, model = %model, attempt, "Model provisioned");
                    return Ok(ModelReport {
                        service: service.to_string(),
                        model: model.to_string(),
                        already_present: false,
                        attempts: attempt,
                    });
                }
                Some(code @ (NOT_EXECUTABLE | NOT_FOUND)) => {
                    return Err(KumiError::Launch {
                        service: service.to_string(),
                        message: format!(
                            "'{}' cannot run (exit {}): {}",
                            argv.join(" "),
                            code,
                            tail(&output.output)
                        ),
                        attempts: attempt,
                    });
                }
                code => {
                    warn!(
                        service = %service,
                        model = %model,
                        attempt,
                        exit_code = ?code,
                        output = %tail(&output.output),
                        "Model command crashed"
                    );
                    last_exit_code = code;
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(KumiError::cancelled(format!("provisioning of {}", model)));
                    }
                    _ = tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)) => {}
                }
            }
        }

        Err(KumiError::ModelUnstable {
            service: service.to_string(),
            model: model.to_string(),
            attempts: max_attempts,
            last_exit_code,
        })
    }

    async fn run(
        &self,
        supervisor: &ServiceSupervisor,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        tokio::select! {
            _ = cancel.cancelled() => {
                Err(KumiError::cancelled(format!("'{}' in {}", argv.join(" "), supervisor.name())))
            }
            output = self.runtime.exec(supervisor.spec(), argv, self.command_timeout) => output,
        }
    }
}

fn command_argv(template: &str, model: &str) -> Result<Vec<String>> {
    let argv = render_command(template, model).map_err(|e| {
        KumiError::config_with_source(format!("Cannot parse model command '{}'", template), e)
    })?;
    if argv.is_empty() {
        return Err(KumiError::config("Model command is empty"));
    }
    Ok(argv)
}

/// Rejects identifiers that cannot name a single model.
fn validate_model_id(model: &str) -> Result<()> {
    if model.is_empty() {
        return Err(KumiError::invalid_request("Model identifier is empty"));
    }
    if let Some(c) = model.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(KumiError::invalid_request(format!(
            "Model identifier {:?} contains {:?}",
            model, c
        )));
    }
    Ok(())
}

/// Last line of command output, for error messages.
fn tail(output: &str) -> &str {
    output
        .trim()
        .lines()
        .last()
        .map(str::trim)
        .unwrap_or("")
}
