//! HTTP Client module for kumi.
//!
//! This module provides the HTTP client used by the CLI to query and drive
//! a running supervisor daemon.

pub mod api;

pub use api::KumiClient;
