//! Error types for the Shophook core library.

use thiserror::Error;

/// Core error type for the webhook pipeline.
#[derive(Error, Debug)]
pub enum ShophookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Date parsing error in {field}: {message}")]
    DateParse {
        field: &'static str,
        message: String,
    },

    #[error("Webhook signature verification failed")]
    Authentication,

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Failed to read request body: {0}")]
    Read(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid webhook payload: {0}")]
    Validation(String),

    #[error("Unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("Failed to persist webhook job: {0}")]
    Persist(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Webhook job not found: {0}")]
    JobNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Processing timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ShophookError {
    /// Whether a failed attempt should be retried later.
    ///
    /// Backend and persistence failures are transient. Malformed, unauthenticated
    /// and unsupported deliveries will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShophookError::Database(_)
            | ShophookError::Persist(_)
            | ShophookError::Storage(_)
            | ShophookError::OrderNotFound(_)
            | ShophookError::Timeout(_)
            | ShophookError::Read(_) => true,
            ShophookError::Migration(_)
            | ShophookError::Json(_)
            | ShophookError::DateParse { .. }
            | ShophookError::Authentication
            | ShophookError::MissingHeader(_)
            | ShophookError::PayloadTooLarge { .. }
            | ShophookError::Validation(_)
            | ShophookError::UnsupportedEvent(_)
            | ShophookError::JobNotFound(_)
            | ShophookError::Configuration(_) => false,
        }
    }
}

/// Result type alias for Shophook operations.
pub type Result<T> = std::result::Result<T, ShophookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ShophookError::Storage("disk full".into()).is_retryable());
        assert!(ShophookError::Persist("locked".into()).is_retryable());
        assert!(ShophookError::OrderNotFound(42).is_retryable());
        assert!(ShophookError::Timeout(30).is_retryable());

        assert!(!ShophookError::Validation("missing id".into()).is_retryable());
        assert!(!ShophookError::Authentication.is_retryable());
        assert!(!ShophookError::UnsupportedEvent("carts/create".into()).is_retryable());
    }
}
