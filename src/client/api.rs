//! Kumi HTTP client API.
//!
//! This module provides the client the CLI uses to talk to a running
//! `kumi serve` daemon.

use crate::controller::StackStatus;
use crate::error::{KumiError, Result};
use crate::provision::ModelReport;
use crate::server::response::{ApiResponse, HealthData, ModelRequest, StopRequest};
use crate::supervisor::ServiceStatus;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for HTTP requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client for a kumi daemon.
#[derive(Debug, Clone)]
pub struct KumiClient {
    /// HTTP client.
    client: Client,
    /// Base URL of the daemon.
    base_url: String,
}

impl KumiClient {
    /// Creates a new client for the specified daemon URL.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the daemon (e.g., "http://127.0.0.1:7878")
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a new client with custom timeout.
    ///
    /// Model pulls can take a long time, so `ensure-model` uses this with
    /// the configured model timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KumiError::runtime_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Checks the health of the daemon.
    pub async fn health(&self) -> Result<HealthData> {
        let url = format!("{}/api/v1/health", self.base_url);
        debug!(url = %url, "Checking daemon health");
        self.send(self.client.get(&url), "health").await
    }

    /// Gets the stack status.
    pub async fn status(&self) -> Result<StackStatus> {
        let url = format!("{}/api/v1/status", self.base_url);
        debug!(url = %url, "Getting stack status");
        self.send(self.client.get(&url), "status").await
    }

    /// Gets the status of one service.
    pub async fn service(&self, name: &str) -> Result<ServiceStatus> {
        let url = format!("{}/api/v1/services/{}", self.base_url, name);
        debug!(url = %url, service = %name, "Getting service status");
        self.send(self.client.get(&url), "service").await
    }

    /// Asks the daemon to ensure a model inside a service.
    pub async fn ensure_model(&self, service: &str, model: &str) -> Result<ModelReport> {
        let url = format!("{}/api/v1/models", self.base_url);
        let request = ModelRequest {
            service: service.to_string(),
            model: model.to_string(),
        };

        info!(url = %url, service = %service, model = %model, "Sending ensure-model request");
        self.send(self.client.post(&url).json(&request), "ensure-model")
            .await
    }

    /// Asks the daemon to stop the stack and exit.
    pub async fn stop(&self, purge_volumes: bool) -> Result<StackStatus> {
        let url = format!("{}/api/v1/stop", self.base_url);
        let request = StopRequest { purge_volumes };

        info!(url = %url, purge_volumes, "Sending stop request");
        self.send(self.client.post(&url).json(&request), "stop").await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| KumiError::connection_with_source(&self.base_url, e))?;

        let api_response: ApiResponse<T> = response.json().await.map_err(|e| {
            KumiError::runtime_with_source(format!("Failed to parse {} response", what), e)
        })?;

        if api_response.success {
            api_response
                .data
                .ok_or_else(|| KumiError::runtime(format!("{} response missing data", what)))
        } else {
            Err(Self::extract_error(&api_response))
        }
    }

    /// Extracts an error from an API response.
    fn extract_error<T>(response: &ApiResponse<T>) -> KumiError {
        match &response.error {
            Some(err) => KumiError::Remote {
                code: err.code,
                message: err.message.clone(),
            },
            None => KumiError::runtime("Unknown error"),
        }
    }
}
