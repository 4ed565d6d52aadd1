//! Docker CLI runtime implementation.
//!
//! Every operation shells out to the configured runtime binary. Podman works
//! as a drop-in since only the common CLI surface is used.

use crate::config::{Config, DeviceRequest, ServiceSpec};
use crate::error::{KumiError, Result};
use crate::runtime::backend::{ContainerRuntime, ContainerState, ExecOutput};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Label carrying the project name on every container we create.
pub const PROJECT_LABEL: &str = "io.kumi.project";

/// Label carrying the service name on every container we create.
pub const SERVICE_LABEL: &str = "io.kumi.service";

/// Networks the runtime provides and that must not be created.
const BUILTIN_NETWORKS: [&str; 3] = ["bridge", "host", "none"];

/// Docker CLI runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    global_args: Vec<String>,
    project: String,
    create_network: bool,
    command_timeout: Duration,
    stop_seconds: u64,
}

impl DockerRuntime {
    /// Creates a runtime from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.runtime.binary.clone(),
            global_args: config.runtime.global_args.clone(),
            project: config.project.clone(),
            create_network: config.runtime.create_network,
            command_timeout: Duration::from_secs(config.timeout.command_seconds),
            stop_seconds: config.timeout.stop_seconds,
        }
    }

    /// Runs the runtime binary with the given arguments.
    ///
    /// Returns the exit code (`None` if killed by a signal) and the combined
    /// output.
    async fn run(&self, args: &[String], limit: Duration) -> Result<(Option<i32>, String)> {
        debug!(binary = %self.binary, args = ?args, "Executing runtime command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.global_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| KumiError::Timeout {
                operation: format!(
                    "{} {}",
                    self.binary,
                    args.first().map(String::as_str).unwrap_or("")
                ),
                seconds: limit.as_secs(),
            })?
            .map_err(|e| {
                KumiError::runtime_with_source(format!("Failed to execute '{}'", self.binary), e)
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined_output = if stderr.is_empty() {
            stdout.to_string()
        } else if stdout.is_empty() {
            stderr.to_string()
        } else {
            format!("{}\n{}", stdout, stderr)
        };

        debug!(
            exit_code = output.status.code(),
            stdout = %stdout.trim(),
            stderr = %stderr.trim(),
            "Runtime command completed"
        );

        Ok((output.status.code(), combined_output))
    }

    /// Builds the `run` arguments for a service.
    pub fn run_args(&self, spec: &ServiceSpec) -> Result<Vec<String>> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            spec.container().to_string(),
            "--label".into(),
            format!("{}={}", PROJECT_LABEL, self.project),
            "--label".into(),
            format!("{}={}", SERVICE_LABEL, spec.name),
            "--restart".into(),
            spec.restart.docker_flag().to_string(),
        ];

        if !spec.network.is_empty() {
            args.push("--network".into());
            args.push(spec.network.clone());
            if !BUILTIN_NETWORKS.contains(&spec.network.as_str()) {
                args.push("--network-alias".into());
                args.push(spec.name.clone());
            }
        }

        for device in spec.device_requests()? {
            match device {
                DeviceRequest::Gpus(count) => {
                    args.push("--gpus".into());
                    args.push(count);
                }
                DeviceRequest::Device(path) => {
                    args.push("--device".into());
                    args.push(path);
                }
            }
        }

        for volume in &spec.volumes {
            args.push("--volume".into());
            args.push(volume.clone());
        }
        for port in &spec.ports {
            args.push("--publish".into());
            args.push(port.clone());
        }
        for (key, value) in spec.env_pairs() {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        Ok(args)
    }
}

/// Parses `inspect --format '{{.State.Status}} {{.State.ExitCode}}'` output.
///
/// A `restarting` container is crash-looping under its restart policy and
/// counts as exited with its last exit code.
pub fn parse_inspect(output: &str) -> ContainerState {
    let mut parts = output.split_whitespace();
    let status = parts.next().unwrap_or("");
    let exit_code = parts.next().and_then(|c| c.parse::<i32>().ok());

    match status {
        "running" => ContainerState::Running,
        "" => ContainerState::Missing,
        _ => ContainerState::Exited { exit_code },
    }
}

fn is_missing(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("no such volume")
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_network(&self, network: &str) -> Result<()> {
        if network.is_empty() || BUILTIN_NETWORKS.contains(&network) {
            return Ok(());
        }

        let (code, _) = self
            .run(
                &["network".into(), "inspect".into(), network.to_string()],
                self.command_timeout,
            )
            .await?;
        if code == Some(0) {
            return Ok(());
        }

        if !self.create_network {
            return Err(KumiError::runtime(format!(
                "Network '{}' does not exist and runtime.create_network is disabled",
                network
            )));
        }

        info!(network = %network, "Creating network");
        let (code, output) = self
            .run(
                &[
                    "network".into(),
                    "create".into(),
                    "--label".into(),
                    format!("{}={}", PROJECT_LABEL, self.project),
                    network.to_string(),
                ],
                self.command_timeout,
            )
            .await?;

        if code == Some(0) || output.contains("already exists") {
            Ok(())
        } else {
            Err(KumiError::runtime(format!(
                "Failed to create network '{}': {}",
                network,
                output.trim()
            )))
        }
    }

    async fn launch(&self, spec: &ServiceSpec) -> Result<()> {
        let args = self.run_args(spec)?;

        info!(service = %spec.name, image = %spec.image, "Launching container");

        let (code, output) = self.run(&args, self.command_timeout).await.map_err(|e| match e {
            KumiError::Runtime { message, .. } => KumiError::launch(&spec.name, message),
            other => other,
        })?;

        if code == Some(0) {
            Ok(())
        } else {
            warn!(
                service = %spec.name,
                exit_code = ?code,
                output = %output.trim(),
                "Container launch failed"
            );
            Err(KumiError::launch(
                &spec.name,
                format!("exit status {:?}: {}", code, output.trim()),
            ))
        }
    }

    async fn remove(&self, spec: &ServiceSpec) -> Result<()> {
        let container = spec.container().to_string();

        info!(service = %spec.name, container = %container, "Removing container");

        let grace = Duration::from_secs(self.stop_seconds);
        let (code, output) = self
            .run(
                &[
                    "stop".into(),
                    "--time".into(),
                    self.stop_seconds.to_string(),
                    container.clone(),
                ],
                self.command_timeout + grace,
            )
            .await?;
        if code != Some(0) && !is_missing(&output) {
            warn!(service = %spec.name, output = %output.trim(), "Graceful stop failed, forcing removal");
        }

        let (code, output) = self
            .run(&["rm".into(), "--force".into(), container], self.command_timeout)
            .await?;

        if code == Some(0) || is_missing(&output) {
            Ok(())
        } else {
            Err(KumiError::runtime(format!(
                "Failed to remove container for '{}': {}",
                spec.name,
                output.trim()
            )))
        }
    }

    async fn inspect(&self, spec: &ServiceSpec) -> Result<ContainerState> {
        let (code, output) = self
            .run(
                &[
                    "inspect".into(),
                    "--type".into(),
                    "container".into(),
                    "--format".into(),
                    "{{.State.Status}} {{.State.ExitCode}}".into(),
                    spec.container().to_string(),
                ],
                self.command_timeout,
            )
            .await?;

        if code == Some(0) {
            Ok(parse_inspect(&output))
        } else if is_missing(&output) {
            Ok(ContainerState::Missing)
        } else {
            Err(KumiError::runtime(format!(
                "Failed to inspect '{}': {}",
                spec.container(),
                output.trim()
            )))
        }
    }

    async fn exec(
        &self,
        spec: &ServiceSpec,
        argv: &[String],
        limit: Duration,
    ) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(KumiError::invalid_request("Empty command"));
        }

        let mut args = vec!["exec".to_string(), spec.container().to_string()];
        args.extend(argv.iter().cloned());

        let (code, output) = self.run(&args, limit).await?;
        Ok(ExecOutput::new(code, output))
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        info!(volume = %volume, "Removing volume");

        let (code, output) = self
            .run(
                &["volume".into(), "rm".into(), volume.to_string()],
                self.command_timeout,
            )
            .await?;

        if code == Some(0) || is_missing(&output) {
            Ok(())
        } else {
            Err(KumiError::runtime(format!(
                "Failed to remove volume '{}': {}",
                volume,
                output.trim()
            )))
        }
    }
}
