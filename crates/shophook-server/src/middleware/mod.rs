//! HTTP middleware.

pub mod ops_auth;

pub use ops_auth::{OpsAuthConfig, require_ops};
