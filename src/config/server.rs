//! Daemon HTTP server configuration.

use serde::{Deserialize, Serialize};

/// HTTP server configuration for `kumi serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,

    /// Listen port.
    pub port: u16,

    /// Interval between reconcile passes in seconds.
    pub reconcile_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7878,
            reconcile_seconds: 15,
        }
    }
}

impl ServerConfig {
    /// Returns the base URL a local client would use to reach the daemon.
    pub fn local_url(&self) -> String {
        let host = if self.bind == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.bind.as_str()
        };
        format!("http://{}:{}", host, self.port)
    }
}
