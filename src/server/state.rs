//! Shared daemon state handed to every handler.

use crate::controller::StackController;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::response::StatsInfo;

/// Shared application state.
pub struct AppState {
    /// Stack controller.
    pub controller: Arc<StackController>,
    /// Cancelled when the daemon shuts down.
    pub shutdown: CancellationToken,
    started: Instant,
    /// API counters.
    pub stats: ApiCounters,
}

impl AppState {
    pub fn new(controller: Arc<StackController>, shutdown: CancellationToken) -> Self {
        Self {
            controller,
            shutdown,
            started: Instant::now(),
            stats: ApiCounters::default(),
        }
    }

    /// Seconds since the daemon started.
    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Outcome counters for the daemon API.
#[derive(Default)]
pub struct ApiCounters {
    served: AtomicU64,
    rejected: AtomicU64,
    models_provisioned: AtomicU64,
}

impl ApiCounters {
    /// Counts a request answered successfully.
    pub fn served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request answered with an error.
    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a model pulled or confirmed through the API.
    pub fn model_provisioned(&self) {
        self.models_provisioned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsInfo {
        let served = self.served.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        StatsInfo {
            requests_total: served + rejected,
            requests_failed: rejected,
            models_provisioned: self.models_provisioned.load(Ordering::Relaxed),
        }
    }
}
