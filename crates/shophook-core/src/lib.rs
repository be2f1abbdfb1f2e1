//! Shophook Core Library
//!
//! Webhook verification, durable job queueing and order processing for the
//! Shophook ingestion service.

pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod processor;
pub mod queue;
pub mod webhook;

pub use error::{Result, ShophookError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
