//! Service definitions: the declarative equivalent of a compose file.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::KumiError;

use super::RetryConfig;

/// One supervised service (a container).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    /// Unique service name. Also used as the network alias.
    pub name: String,

    /// Image reference, e.g. `ollama/ollama:latest`.
    pub image: String,

    /// Device requests: `gpu`, `gpu:all`, `gpu:<count>`, or a host device path.
    pub devices: Vec<String>,

    /// Volume mounts as `source:target[:mode]`.
    pub volumes: Vec<String>,

    /// Network to attach to. Empty means the stack network.
    pub network: String,

    /// Names of services that must be ready before this one starts.
    pub depends_on: Vec<String>,

    /// What to do when a launch fails.
    pub restart: RestartPolicy,

    /// Published ports as `host:container`.
    pub ports: Vec<String>,

    /// Environment variables as `KEY=VALUE`.
    pub env: Vec<String>,

    /// Command override passed after the image.
    pub command: Vec<String>,

    /// How readiness is determined.
    pub readiness: ProbeSpec,

    /// Container name. Defaults to `<project>-<name>`.
    pub container_name: Option<String>,
}

impl ServiceSpec {
    /// Creates a spec with a name and image and defaults for everything else.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Adds a dependency.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    /// Sets the restart policy.
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Sets the readiness probe.
    pub fn with_readiness(mut self, readiness: ProbeSpec) -> Self {
        self.readiness = readiness;
        self
    }

    /// Name of the container backing this service.
    pub fn container(&self) -> &str {
        self.container_name.as_deref().unwrap_or(&self.name)
    }

    /// Parsed device requests.
    pub fn device_requests(&self) -> Result<Vec<DeviceRequest>, KumiError> {
        self.devices.iter().map(|d| d.parse()).collect()
    }

    /// Named (non-bind) volumes declared by this service.
    pub fn named_volumes(&self) -> Vec<&str> {
        self.volumes
            .iter()
            .filter_map(|v| v.split(':').next())
            .filter(|source| {
                !source.is_empty()
                    && !source.starts_with('/')
                    && !source.starts_with('.')
                    && !source.starts_with('~')
            })
            .collect()
    }

    /// Environment variables split into key/value pairs.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|e| e.split_once('='))
    }
}

/// Restart policy applied to launch failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Retry failed launches and relaunch containers that stop.
    #[default]
    Always,
    /// Retry failed launches only.
    OnFailure,
    /// Never retry.
    Never,
}

impl RestartPolicy {
    /// Number of launch attempts allowed under this policy.
    pub fn launch_attempts(&self, retry: &RetryConfig) -> u32 {
        match self {
            RestartPolicy::Always | RestartPolicy::OnFailure => retry.max_attempts.max(1),
            RestartPolicy::Never => 1,
        }
    }

    /// Whether a container that stopped after becoming ready is relaunched.
    pub fn relaunch_on_exit(&self) -> bool {
        !matches!(self, RestartPolicy::Never)
    }

    /// The equivalent `docker run --restart` value.
    pub fn docker_flag(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::Never => "no",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::Never => write!(f, "never"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = KumiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(RestartPolicy::Always),
            "on-failure" | "on_failure" | "onfailure" => Ok(RestartPolicy::OnFailure),
            "never" | "no" => Ok(RestartPolicy::Never),
            _ => Err(KumiError::config(format!("Unknown restart policy: {}", s))),
        }
    }
}

/// A parsed device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    /// GPUs through the runtime's GPU support (`all` or a count).
    Gpus(String),
    /// A host device path or CDI name passed through as is.
    Device(String),
}

impl FromStr for DeviceRequest {
    type Err = KumiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            _ if s.eq_ignore_ascii_case("gpu") => Ok(DeviceRequest::Gpus("all".to_string())),
            Some((kind, count)) if kind.eq_ignore_ascii_case("gpu") => {
                if count == "all" || count.parse::<u32>().map(|n| n > 0).unwrap_or(false) {
                    Ok(DeviceRequest::Gpus(count.to_string()))
                } else {
                    Err(KumiError::config(format!(
                        "Invalid GPU request '{}': expected gpu, gpu:all or gpu:<count>",
                        s
                    )))
                }
            }
            _ if s.is_empty() => Err(KumiError::config("Empty device request")),
            _ => Ok(DeviceRequest::Device(s.to_string())),
        }
    }
}

/// Readiness probe definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeSpec {
    /// Ready as soon as the runtime reports the container running.
    #[default]
    Running,
    /// HTTP GET from the host.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_status: Option<u16>,
    },
    /// TCP connect from the host.
    Tcp { address: String },
    /// Command run inside the container; exit code 0 means ready.
    Exec { command: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_parse_and_attempts() {
        assert_eq!("always".parse::<RestartPolicy>().unwrap(), RestartPolicy::Always);
        assert_eq!(
            "on-failure".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure
        );
        assert_eq!("no".parse::<RestartPolicy>().unwrap(), RestartPolicy::Never);
        assert!("sometimes".parse::<RestartPolicy>().is_err());

        let retry = RetryConfig {
            max_attempts: 4,
            ..Default::default()
        };
        assert_eq!(RestartPolicy::Always.launch_attempts(&retry), 4);
        assert_eq!(RestartPolicy::OnFailure.launch_attempts(&retry), 4);
        assert_eq!(RestartPolicy::Never.launch_attempts(&retry), 1);
        assert!(!RestartPolicy::Never.relaunch_on_exit());
    }

    #[test]
    fn test_restart_policy_yaml() {
        let policy: RestartPolicy = serde_yaml::from_str("on-failure").unwrap();
        assert_eq!(policy, RestartPolicy::OnFailure);
        assert_eq!(RestartPolicy::OnFailure.docker_flag(), "on-failure");
    }

    #[test]
    fn test_device_request_parse() {
        assert_eq!(
            "gpu".parse::<DeviceRequest>().unwrap(),
            DeviceRequest::Gpus("all".to_string())
        );
        assert_eq!(
            "GPU:2".parse::<DeviceRequest>().unwrap(),
            DeviceRequest::Gpus("2".to_string())
        );
        assert_eq!(
            "/dev/dri".parse::<DeviceRequest>().unwrap(),
            DeviceRequest::Device("/dev/dri".to_string())
        );
        assert!("gpu:0".parse::<DeviceRequest>().is_err());
        assert!("gpu:many".parse::<DeviceRequest>().is_err());
    }

    #[test]
    fn test_named_volumes() {
        let mut spec = ServiceSpec::new("webui", "ghcr.io/open-webui/open-webui:main");
        spec.volumes = vec![
            "open-webui:/app/backend/data".to_string(),
            "/srv/models:/models:ro".to_string(),
            "./cache:/cache".to_string(),
        ];
        assert_eq!(spec.named_volumes(), vec!["open-webui"]);
    }

    #[test]
    fn test_probe_spec_yaml() {
        let probe: ProbeSpec = serde_yaml::from_str(
            "kind: http\nurl: http://127.0.0.1:11434/api/version\n",
        )
        .unwrap();
        assert_eq!(
            probe,
            ProbeSpec::Http {
                url: "http://127.0.0.1:11434/api/version".to_string(),
                expect_status: None
            }
        );

        let probe: ProbeSpec = serde_yaml::from_str("kind: running").unwrap();
        assert_eq!(probe, ProbeSpec::Running);
    }

    #[test]
    fn test_container_defaults_to_name() {
        let spec = ServiceSpec::new("ollama", "ollama/ollama");
        assert_eq!(spec.container(), "ollama");

        let spec = ServiceSpec {
            container_name: Some("llm-ollama".to_string()),
            ..spec
        };
        assert_eq!(spec.container(), "llm-ollama");
    }
}
