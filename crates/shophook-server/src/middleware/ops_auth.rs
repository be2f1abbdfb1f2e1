//! Bearer-token authentication for operational endpoints.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Ops authentication configuration.
#[derive(Debug, Clone, Default)]
pub struct OpsAuthConfig {
    /// Token expected in `Authorization: Bearer <token>`.
    pub ops_token: Option<Arc<String>>,
}

impl OpsAuthConfig {
    pub fn new(ops_token: Option<String>) -> Self {
        Self {
            ops_token: ops_token.filter(|t| !t.is_empty()).map(Arc::new),
        }
    }

    /// Creates config from `SHOPHOOK_OPS_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("SHOPHOOK_OPS_TOKEN").ok())
    }

    pub fn is_configured(&self) -> bool {
        self.ops_token.is_some()
    }

    /// Validates the provided token using constant-time comparison.
    pub fn validate_token(&self, provided: &str) -> bool {
        match &self.ops_token {
            Some(expected) => {
                let expected_bytes = expected.as_bytes();
                let provided_bytes = provided.as_bytes();

                if expected_bytes.len() != provided_bytes.len() {
                    return false;
                }

                expected_bytes.ct_eq(provided_bytes).into()
            }
            None => false,
        }
    }
}

/// Middleware for use with `axum::middleware::from_fn_with_state`.
pub async fn require_ops(
    State(config): State<Arc<OpsAuthConfig>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !config.is_configured() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "OPS_DISABLED",
            "Ops token not configured. Set SHOPHOOK_OPS_TOKEN.",
        );
    }

    let token = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => {
            let Ok(value) = value.to_str() else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "INVALID_HEADER",
                    "Invalid Authorization header encoding",
                );
            };

            match value.strip_prefix("Bearer ") {
                Some(token) => token,
                None => {
                    return error_response(
                        StatusCode::UNAUTHORIZED,
                        "INVALID_AUTH_TYPE",
                        "Expected 'Bearer' authentication",
                    );
                }
            }
        }
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "MISSING_AUTH",
                "Authorization header required",
            );
        }
    };

    if !config.validate_token(token) {
        tracing::warn!("Rejected ops request with invalid token");
        return error_response(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Invalid ops token");
    }

    let mut response = next.run(req).await;
    add_security_headers(response.headers_mut());
    response
}

fn add_security_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    };

    let mut response = (status, Json(body)).into_response();
    add_security_headers(response.headers_mut());
    response
}
