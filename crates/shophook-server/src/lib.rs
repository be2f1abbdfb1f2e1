//! Shophook server library.
//!
//! This library exposes the server components for use in the binary and in
//! integration tests.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod worker;

pub use config::{DeliveryMode, InlineFailure, ServerConfig};
pub use error::ApiError;
pub use middleware::{OpsAuthConfig, require_ops};
pub use state::AppState;
pub use worker::{DrainConfig, DrainReport, DrainWorker, DrainWorkerHandle, start_drain_worker};

// Re-export shophook_core for convenience
pub use shophook_core;

// Test utilities are available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
