//! Error types and error handling for kumi.
//!
//! This module defines the error taxonomy used throughout the supervisor,
//! including stable error codes, the JSON error form used by the CLI and the
//! daemon API, and CLI exit codes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Stable error codes. Each error has a unique code for identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// E001: Configuration is malformed or the service graph is cyclic
    #[serde(rename = "E001")]
    ConfigInvalid,

    /// E002: Named service is not declared
    #[serde(rename = "E002")]
    ServiceNotFound,

    /// E003: Service could not be launched
    #[serde(rename = "E003")]
    LaunchFailed,

    /// E004: Container runtime operation failed
    #[serde(rename = "E004")]
    RuntimeError,

    /// E005: Operation timed out
    #[serde(rename = "E005")]
    Timeout,

    /// E006: Failed to connect to a running supervisor
    #[serde(rename = "E006")]
    ConnectionError,

    /// E007: Model crashed the backend repeatedly
    #[serde(rename = "E007")]
    ModelUnstable,

    /// E008: Request is invalid for the current state
    #[serde(rename = "E008")]
    InvalidRequest,

    /// E009: Operation was cancelled
    #[serde(rename = "E009")]
    Cancelled,
}

impl ErrorCode {
    /// Returns the error code as a string (e.g., "E001").
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "E001",
            ErrorCode::ServiceNotFound => "E002",
            ErrorCode::LaunchFailed => "E003",
            ErrorCode::RuntimeError => "E004",
            ErrorCode::Timeout => "E005",
            ErrorCode::ConnectionError => "E006",
            ErrorCode::ModelUnstable => "E007",
            ErrorCode::InvalidRequest => "E008",
            ErrorCode::Cancelled => "E009",
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "Configuration is invalid",
            ErrorCode::ServiceNotFound => "Service not found",
            ErrorCode::LaunchFailed => "Service could not be launched",
            ErrorCode::RuntimeError => "Container runtime operation failed",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::ConnectionError => "Failed to connect to supervisor",
            ErrorCode::ModelUnstable => "Model is unstable on this backend",
            ErrorCode::InvalidRequest => "Request is invalid",
            ErrorCode::Cancelled => "Operation was cancelled",
        }
    }

    /// Returns the CLI exit code for this error code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::ConfigInvalid => exit_code::CONFIG_ERROR,
            ErrorCode::ConnectionError => exit_code::CONNECTION_ERROR,
            ErrorCode::Timeout => exit_code::TIMEOUT_ERROR,
            ErrorCode::LaunchFailed => exit_code::LAUNCH_ERROR,
            ErrorCode::ModelUnstable => exit_code::MODEL_UNSTABLE,
            ErrorCode::Cancelled => exit_code::CANCELLED,
            ErrorCode::ServiceNotFound | ErrorCode::RuntimeError | ErrorCode::InvalidRequest => {
                exit_code::GENERAL_ERROR
            }
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ConfigInvalid => 500,
            ErrorCode::ServiceNotFound => 404,
            ErrorCode::LaunchFailed => 502,
            ErrorCode::RuntimeError => 500,
            ErrorCode::Timeout => 504,
            ErrorCode::ConnectionError => 502,
            ErrorCode::ModelUnstable => 422,
            ErrorCode::InvalidRequest => 409,
            ErrorCode::Cancelled => 503,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CLI exit codes.
pub mod exit_code {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// General error
    pub const GENERAL_ERROR: i32 = 1;
    /// Configuration error
    pub const CONFIG_ERROR: i32 = 2;
    /// Connection error
    pub const CONNECTION_ERROR: i32 = 3;
    /// Timeout error
    pub const TIMEOUT_ERROR: i32 = 4;
    /// Launch error
    pub const LAUNCH_ERROR: i32 = 5;
    /// Model unstable
    pub const MODEL_UNSTABLE: i32 = 6;
    /// Command line argument error
    pub const CLI_ERROR: i32 = 64;
    /// Cancelled by the operator
    pub const CANCELLED: i32 = 130;
}

/// The main error type for kumi.
#[derive(Debug, Error)]
pub enum KumiError {
    /// Configuration file is invalid or cannot be loaded.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Service dependencies form a cycle.
    #[error("Configuration error: dependency cycle {}", .services.join(" -> "))]
    Cycle { services: Vec<String> },

    /// Named service is not declared.
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    /// Service could not be launched after all permitted attempts.
    #[error("Launch error: {service} ({message}, {attempts} attempt(s))")]
    Launch {
        service: String,
        message: String,
        attempts: u32,
    },

    /// Container runtime operation failed.
    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("Timeout: {operation} (waited {seconds}s)")]
    Timeout { operation: String, seconds: u64 },

    /// Failed to connect to a running supervisor.
    #[error("Connection error: {target}")]
    Connection {
        target: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Model provisioning crashed the backend repeatedly.
    #[error("Model unstable: {model} on {service} failed {attempts} attempt(s); retry with a smaller model")]
    ModelUnstable {
        service: String,
        model: String,
        attempts: u32,
        last_exit_code: Option<i32>,
    },

    /// Request is invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Operation was cancelled.
    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    /// Error reported by a remote supervisor.
    #[error("[{code}] {message}")]
    Remote { code: ErrorCode, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KumiError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            KumiError::Config { .. } | KumiError::Cycle { .. } => ErrorCode::ConfigInvalid,
            KumiError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            KumiError::Launch { .. } => ErrorCode::LaunchFailed,
            KumiError::Runtime { .. } => ErrorCode::RuntimeError,
            KumiError::Timeout { .. } => ErrorCode::Timeout,
            KumiError::Connection { .. } => ErrorCode::ConnectionError,
            KumiError::ModelUnstable { .. } => ErrorCode::ModelUnstable,
            KumiError::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            KumiError::Cancelled { .. } => ErrorCode::Cancelled,
            KumiError::Remote { code, .. } => *code,
            KumiError::Io(_) => ErrorCode::RuntimeError,
            KumiError::Yaml(_) => ErrorCode::ConfigInvalid,
            KumiError::Json(_) => ErrorCode::InvalidRequest,
        }
    }

    /// Returns the CLI exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Creates a configuration error with a message.
    pub fn config(message: impl Into<String>) -> Self {
        KumiError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error with a message and source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        KumiError::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a runtime error with a message.
    pub fn runtime(message: impl Into<String>) -> Self {
        KumiError::Runtime {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a runtime error with a message and source.
    pub fn runtime_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        KumiError::Runtime {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a launch error for a single attempt.
    pub fn launch(service: impl Into<String>, message: impl Into<String>) -> Self {
        KumiError::Launch {
            service: service.into(),
            message: message.into(),
            attempts: 1,
        }
    }

    /// Creates a connection error.
    pub fn connection(target: impl Into<String>) -> Self {
        KumiError::Connection {
            target: target.into(),
            source: None,
        }
    }

    /// Creates a connection error with a source.
    pub fn connection_with_source(
        target: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        KumiError::Connection {
            target: target.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        KumiError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        KumiError::Cancelled {
            operation: operation.into(),
        }
    }
}

/// Error details for JSON error output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context fields.
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl ErrorDetails {
    /// Creates empty error details.
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Adds a field to the error details.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl Default for ErrorDetails {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON error structure shared by the CLI and the daemon API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "E001").
    pub code: ErrorCode,

    /// Human-readable error message.
    pub message: String,

    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an error response from a KumiError.
    pub fn from_error(error: &KumiError) -> Self {
        let code = error.code();
        let message = error.to_string();

        let details = match error {
            KumiError::ServiceNotFound { service } => Some(
                ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("suggestion", "Check the services list in the configuration"),
            ),
            KumiError::Cycle { services } => {
                Some(ErrorDetails::new().with_field("cycle", services.clone()))
            }
            KumiError::Launch {
                service, attempts, ..
            } => Some(
                ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("attempts", *attempts),
            ),
            KumiError::Timeout { operation, seconds } => Some(
                ErrorDetails::new()
                    .with_field("operation", operation.clone())
                    .with_field("timeout_seconds", *seconds),
            ),
            KumiError::Connection { target, .. } => {
                Some(ErrorDetails::new().with_field("target", target.clone()))
            }
            KumiError::ModelUnstable {
                service,
                model,
                attempts,
                last_exit_code,
            } => {
                let mut details = ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("model", model.clone())
                    .with_field("attempts", *attempts)
                    .with_field(
                        "suggestion",
                        "Retry ensure-model with a smaller or alternate model identifier",
                    );
                if let Some(code) = last_exit_code {
                    details = details.with_field("last_exit_code", *code);
                }
                Some(details)
            }
            _ => None,
        };

        Self {
            code,
            message,
            details,
        }
    }
}

/// Result type alias for kumi operations.
pub type Result<T> = std::result::Result<T, KumiError>;
