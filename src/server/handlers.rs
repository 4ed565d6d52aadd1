//! HTTP endpoint handlers for the kumi daemon API.

use crate::error::Result;
use crate::server::response::{
    ApiResponse, HealthData, HealthStatus, ModelRequest, StopRequest,
};
use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wraps a result in the envelope, counting the outcome.
fn respond<T: Serialize>(state: &AppState, result: Result<T>) -> Response {
    match result {
        Ok(data) => {
            state.stats.served();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => {
            state.stats.rejected();
            let status = StatusCode::from_u16(err.code().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ApiResponse::<T>::from_error(&err))).into_response()
        }
    }
}

/// GET /api/v1/health
///
/// Always answers 200; the stack's condition is in `data.status`.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let stack = state.controller.state();
    let data = HealthData {
        status: HealthStatus::from(stack),
        stack,
        version: VERSION.to_string(),
        uptime_seconds: state.uptime_seconds(),
        stats: state.stats.snapshot(),
    };
    respond(&state, Ok(data))
}

/// GET /api/v1/status
pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    let data = state.controller.status();
    respond(&state, Ok(data))
}

/// GET /api/v1/services/:name
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let result = state.controller.service_status(&name);
    respond(&state, result)
}

/// POST /api/v1/models
///
/// Runs until the model is present, the attempts are exhausted or the
/// daemon shuts down.
pub async fn ensure_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelRequest>,
) -> Response {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    info!(
        request_id = %request_id,
        service = %request.service,
        model = %request.model,
        "Ensure-model requested"
    );

    let result = state
        .controller
        .ensure_model(&request.service, &request.model, &state.shutdown)
        .await;

    match &result {
        Ok(report) => {
            state.stats.model_provisioned();
            info!(
                request_id = %request_id,
                already_present = report.already_present,
                attempts = report.attempts,
                duration_ms = started.elapsed().as_millis() as u64,
                "Ensure-model finished"
            );
        }
        Err(e) => {
            error!(request_id = %request_id, code = %e.code(), error = %e, "Ensure-model failed");
        }
    }

    respond(&state, result)
}

/// POST /api/v1/stop
///
/// Tears the stack down, then shuts the daemon down. The body is optional.
pub async fn stop(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StopRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(purge_volumes = request.purge_volumes, "Stop requested");

    let result = state.controller.stop(request.purge_volumes).await;
    if let Err(e) = &result {
        error!(error = %e, "Stop failed");
    }
    state.shutdown.cancel();

    respond(&state, result)
}
