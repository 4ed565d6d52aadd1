//! HTTP Server module - supervisor daemon.
//!
//! `kumi serve` starts the stack, keeps it reconciled and exposes a small
//! REST API for status queries, model provisioning and shutdown.

pub mod handlers;
pub mod response;
pub mod state;

#[cfg(test)]
mod handlers_tests;

use crate::config::Config;
use crate::controller::{StackController, StackState};
use crate::error::{KumiError, Result};
use crate::runtime::ContainerRuntime;
use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Creates the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/services/:name", get(handlers::get_service))
        .route("/api/v1/models", post(handlers::ensure_model))
        .route("/api/v1/stop", post(handlers::stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the supervisor daemon until `shutdown` is cancelled.
///
/// The stack is started once the listener is bound. On shutdown the stack
/// is stopped unless a stop request already did so.
pub async fn serve(
    config: &Config,
    runtime: Arc<dyn ContainerRuntime>,
    shutdown: CancellationToken,
) -> Result<()> {
    let controller = Arc::new(StackController::new(config, runtime)?);
    let state = Arc::new(AppState::new(controller.clone(), shutdown.clone()));
    let router = create_router(state);

    let addr = SocketAddr::new(
        config
            .server
            .bind
            .parse()
            .map_err(|e| KumiError::config(format!("Invalid bind address: {}", e)))?,
        config.server.port,
    );

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        KumiError::runtime_with_source(format!("Failed to bind to {}: {}", addr, e), e)
    })?;
    info!("Starting HTTP server on {}", addr);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let outcome = match controller.start(&shutdown).await {
        Ok(_) => {
            reconcile_loop(
                &controller,
                Duration::from_secs(config.server.reconcile_seconds.max(1)),
                &shutdown,
            )
            .await;
            Ok(())
        }
        Err(e) => {
            shutdown.cancel();
            Err(e)
        }
    };

    if controller.state() != StackState::Stopped {
        info!("Shutting down, stopping stack");
        if let Err(e) = controller.stop(false).await {
            error!(error = %e, "Failed to stop stack on shutdown");
        }
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server exited with error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    outcome
}

async fn reconcile_loop(
    controller: &StackController,
    period: Duration,
    shutdown: &CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match controller.reconcile(shutdown).await {
                    Ok(relaunched) if !relaunched.is_empty() => {
                        info!(services = ?relaunched, "Relaunched services");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Reconcile failed"),
                }
            }
        }
    }
}
