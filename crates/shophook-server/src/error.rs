//! Translation of core errors into HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use shophook_core::ShophookError;

/// Error returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status for a core error.
pub fn status_for(err: &ShophookError) -> StatusCode {
    match err {
        ShophookError::Authentication => StatusCode::UNAUTHORIZED,
        ShophookError::Validation(_) | ShophookError::Json(_) | ShophookError::Read(_) => {
            StatusCode::BAD_REQUEST
        }
        ShophookError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ShophookError::UnsupportedEvent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ShophookError::JobNotFound(_) => StatusCode::NOT_FOUND,
        ShophookError::Persist(_) => StatusCode::SERVICE_UNAVAILABLE,
        ShophookError::MissingHeader(_)
        | ShophookError::Storage(_)
        | ShophookError::Database(_)
        | ShophookError::Migration(_)
        | ShophookError::DateParse { .. }
        | ShophookError::OrderNotFound(_)
        | ShophookError::Timeout(_)
        | ShophookError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ShophookError> for ApiError {
    fn from(err: ShophookError) -> Self {
        let status = status_for(&err);

        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, err);
        } else {
            tracing::warn!("Request rejected with {}: {}", status, err);
        }

        // Backend details stay in the log.
        let message = match &err {
            ShophookError::Database(_) | ShophookError::Migration(_) => "Database error".to_string(),
            ShophookError::Persist(_) => "Failed to persist webhook".to_string(),
            ShophookError::Storage(_) => "Order storage unavailable".to_string(),
            _ => err.to_string(),
        };

        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ShophookError::Authentication), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&ShophookError::Validation("missing id".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ShophookError::PayloadTooLarge { size: 10, limit: 5 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(&ShophookError::UnsupportedEvent("carts/create".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ShophookError::MissingHeader("X-Shopify-Shop-Domain")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ShophookError::Persist("locked".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ShophookError::Storage("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ShophookError::JobNotFound("01H".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_backend_details_are_not_exposed() {
        let err = ApiError::from(ShophookError::Storage("disk /var/db is full".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("/var/db"));
    }
}
