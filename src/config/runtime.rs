//! Container runtime configuration.

use serde::{Deserialize, Serialize};

/// Container runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime CLI binary (`docker`, `podman`, or an absolute path).
    pub binary: String,

    /// Create the stack network when it does not exist.
    pub create_network: bool,

    /// Extra arguments placed before every subcommand, e.g. `["--context", "gpu-box"]`.
    pub global_args: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            create_network: true,
            global_args: Vec::new(),
        }
    }
}
