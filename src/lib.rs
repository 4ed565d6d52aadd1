//! kumi - Local model-stack supervisor
//!
//! This crate brings up a local LLM backend and the web interface that
//! talks to it as ordered, health-checked containers, and tears them down
//! again in reverse order.
//!
//! # Overview
//!
//! Running a model server next to a chat UI usually means a compose file
//! plus a handful of manual `exec` and retry steps. kumi replaces that with
//! a supervisor that knows the dependency graph, waits for real readiness
//! instead of "container created", retries failed launches with backoff and
//! detects models that keep crashing the backend.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`client`] - HTTP client for a running daemon
//! - [`config`] - Configuration file parsing and validation
//! - [`controller`] - Stack-level start/stop/reconcile
//! - [`error`] - Error types and error handling
//! - [`graph`] - Service dependency ordering
//! - [`probe`] - Readiness probes
//! - [`provision`] - Model provisioning inside a ready backend
//! - [`runtime`] - Container runtime abstraction
//! - [`server`] - Supervisor daemon and REST API
//! - [`supervisor`] - Per-service lifecycle state machine

pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod probe;
pub mod provision;
pub mod runtime;
pub mod server;
pub mod supervisor;

// Re-exports for convenience
pub use cli::Cli;
pub use client::KumiClient;
pub use config::Config;
pub use controller::{StackController, StackState, StackStatus};
pub use error::{ErrorCode, KumiError, Result};
pub use server::serve;
