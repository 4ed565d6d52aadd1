//! Configuration module for kumi.
//!
//! This module provides all configuration types and loading functionality.
//! The stack is described by a YAML document listing services in the order
//! they were declared; that order breaks ties when computing start order.

mod logging;
mod models;
mod retry;
mod runtime;
mod server;
mod stack;

pub use logging::{LogFormat, LogLevel, LogOutput, LoggingConfig};
pub use models::{render_command, ModelSpec, ModelsConfig, MODEL_PLACEHOLDER};
pub use retry::{RetryConfig, TimeoutConfig};
pub use runtime::RuntimeConfig;
pub use server::ServerConfig;
pub use stack::{DeviceRequest, ProbeSpec, RestartPolicy, ServiceSpec};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::KumiError;
use crate::graph::DependencyGraph;

/// Files searched, in order, when no path is given.
const DEFAULT_PATHS: [&str; 3] = ["kumi.yaml", "kumi.yml", "/etc/kumi/config.yaml"];

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project name, used as the container name prefix and label.
    pub project: String,

    /// Network shared by all services unless a service names its own.
    pub network: String,

    /// Container runtime configuration.
    pub runtime: RuntimeConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Launch retry configuration.
    pub retry: RetryConfig,

    /// Timeout configuration.
    pub timeout: TimeoutConfig,

    /// Daemon server configuration.
    pub server: ServerConfig,

    /// Model provisioning configuration.
    pub models: ModelsConfig,

    /// Services in declaration order.
    pub services: Vec<ServiceSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: "kumi".to_string(),
            network: "kumi-net".to_string(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            timeout: TimeoutConfig::default(),
            server: ServerConfig::default(),
            models: ModelsConfig::default(),
            services: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from an optional path.
    /// If path is None, uses default search paths.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, KumiError> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => {
                for path in &DEFAULT_PATHS {
                    if Path::new(path).exists() {
                        return Self::load_from_path(path);
                    }
                }

                // No config file found, use defaults
                tracing::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Loads configuration from a YAML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, KumiError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KumiError::config_with_source(
                format!("Failed to read config file '{}'", path.as_ref().display()),
                e,
            )
        })?;

        Self::load_from_str(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn load_from_str(content: &str) -> Result<Self, KumiError> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| KumiError::config_with_source("Failed to parse config", e))?;

        config.resolve();
        config.validate()?;
        Ok(config)
    }

    /// Fills per-service defaults that derive from stack-level settings.
    pub fn resolve(&mut self) {
        for service in &mut self.services {
            if service.network.is_empty() {
                service.network = self.network.clone();
            }
            if service.container_name.is_none() {
                service.container_name = Some(format!("{}-{}", self.project, service.name));
            }
        }
    }

    /// Validates configuration.
    pub fn validate(&self) -> Result<(), KumiError> {
        if self.project.trim().is_empty() {
            return Err(KumiError::config("project must not be empty"));
        }
        if self.network.trim().is_empty() {
            return Err(KumiError::config("network must not be empty"));
        }
        if self.runtime.binary.trim().is_empty() {
            return Err(KumiError::config("runtime.binary must not be empty"));
        }

        if self.retry.max_attempts == 0 {
            return Err(KumiError::config("retry.max_attempts must be > 0"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(KumiError::config("retry.multiplier must be >= 1.0"));
        }
        if self.timeout.probe_interval_ms == 0 {
            return Err(KumiError::config("timeout.probe_interval_ms must be > 0"));
        }
        if self.timeout.readiness_seconds == 0 {
            return Err(KumiError::config("timeout.readiness_seconds must be > 0"));
        }

        if self.models.max_attempts == 0 {
            return Err(KumiError::config("models.max_attempts must be > 0"));
        }
        if !self.models.pull_command.contains(MODEL_PLACEHOLDER) {
            return Err(KumiError::config(format!(
                "models.pull_command must contain {}",
                MODEL_PLACEHOLDER
            )));
        }
        let templates = std::iter::once(&self.models.pull_command)
            .chain(self.models.check_command.as_ref());
        for template in templates {
            match shell_words::split(template) {
                Ok(words) if !words.is_empty() => {}
                Ok(_) => return Err(KumiError::config("Model command is empty")),
                Err(e) => {
                    return Err(KumiError::config_with_source(
                        format!("Cannot parse model command '{}'", template),
                        e,
                    ))
                }
            }
        }

        if self.logging.output == LogOutput::File && self.logging.file_path.is_none() {
            return Err(KumiError::config(
                "logging.file_path is required when output is file",
            ));
        }

        let mut containers = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(KumiError::config("services[].name is required"));
            }
            if service.image.trim().is_empty() {
                return Err(KumiError::config(format!(
                    "services.{}.image is required",
                    service.name
                )));
            }
            if let Some(bad) = service.env.iter().find(|e| !e.contains('=')) {
                return Err(KumiError::config(format!(
                    "services.{}.env entry '{}' must be KEY=VALUE",
                    service.name, bad
                )));
            }
            service.device_requests()?;
            if !containers.insert(service.container()) {
                return Err(KumiError::config(format!(
                    "services.{}: container name '{}' is already used",
                    service.name,
                    service.container()
                )));
            }
        }

        // Duplicate names, unknown dependencies and cycles.
        DependencyGraph::new(&self.services)?;

        for model in &self.models.ensure {
            if model.id.trim().is_empty() {
                return Err(KumiError::config("models.ensure[].id is required"));
            }
            if self.service(&model.service).is_none() {
                return Err(KumiError::config(format!(
                    "models.ensure: model '{}' targets unknown service '{}'",
                    model.id, model.service
                )));
            }
        }

        Ok(())
    }

    /// Looks up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}
