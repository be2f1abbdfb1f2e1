//! Domain models for the webhook pipeline.

pub mod order;
pub mod webhook;

pub use order::*;
pub use webhook::*;
