//! API response types and formatting.
//!
//! Every endpoint answers with the same envelope: `{success, data, error,
//! timestamp}`. The CLI prints the same shapes for local commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::StackState;
use crate::error::{ErrorResponse, KumiError};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error information (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
    /// Response timestamp.
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed response with an error.
    pub fn error(error: ErrorResponse) -> ApiResponse<T> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed response from a KumiError.
    pub fn from_error(err: &KumiError) -> ApiResponse<T> {
        Self::error(ErrorResponse::from_error(err))
    }
}

/// Health check response data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthData {
    /// Health status.
    pub status: HealthStatus,
    /// Stack state behind the health status.
    pub stack: StackState,
    /// Application version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Request counters.
    pub stats: StatsInfo,
}

/// Health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stack is running.
    Healthy,
    /// Stack is starting or stopping.
    Degraded,
    /// Stack failed or is down.
    Unhealthy,
}

impl From<StackState> for HealthStatus {
    fn from(state: StackState) -> Self {
        match state {
            StackState::Running => HealthStatus::Healthy,
            StackState::Uninitialized | StackState::Starting | StackState::Stopping => {
                HealthStatus::Degraded
            }
            StackState::Stopped | StackState::Failed => HealthStatus::Unhealthy,
        }
    }
}

/// API counters since the daemon started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsInfo {
    pub requests_total: u64,
    pub requests_failed: u64,
    /// Models pulled or found present through `POST /api/v1/models`.
    pub models_provisioned: u64,
}

/// Ensure-model request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Target service.
    pub service: String,
    /// Model identifier.
    pub model: String,
}

/// Stop request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopRequest {
    /// Also remove named volumes.
    #[serde(default)]
    pub purge_volumes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_api_response_success() {
        let response: ApiResponse<String> = ApiResponse::success("test data".to_string());

        assert!(response.success);
        assert_eq!(response.data, Some("test data".to_string()));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_from_error() {
        let err = KumiError::ModelUnstable {
            service: "ollama".to_string(),
            model: "codellama:34b".to_string(),
            attempts: 3,
            last_exit_code: Some(2),
        };
        let response: ApiResponse<String> = ApiResponse::from_error(&err);

        assert!(!response.success);
        assert!(response.data.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::ModelUnstable);

        let json = serde_json::to_value(error).unwrap();
        assert_eq!(json["code"], "E007");
        assert_eq!(json["details"]["model"], "codellama:34b");
    }

    #[test]
    fn test_health_status_from_stack_state() {
        assert_eq!(HealthStatus::from(StackState::Running), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(StackState::Starting), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from(StackState::Failed), HealthStatus::Unhealthy);
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn test_model_request_deserialization() {
        let json = r#"{"service": "ollama", "model": "codellama:13b"}"#;
        let request: ModelRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.service, "ollama");
        assert_eq!(request.model, "codellama:13b");
    }

    #[test]
    fn test_stop_request_defaults() {
        let request: StopRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.purge_volumes);
    }
}
