//! Shopify webhook endpoints.
//!
//! Every endpoint runs the same pipeline: identify the shop, capture the body
//! once under the size limit, verify the signature over the captured bytes,
//! then either process the event inline or persist it for the drain worker.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use serde_json::{Value, json};
use shophook_core::{
    ShophookError,
    dispatch::UnsupportedAction,
    models::{EventKind, JobId},
    webhook::{CapturedPayload, HEADER_HMAC, capture, check_declared_length, validate_payload},
};

use crate::config::{DeliveryMode, InlineFailure};
use crate::error::ApiError;
use crate::state::AppState;

/// Shop domain header sent by the platform.
pub const HEADER_SHOP_DOMAIN: &str = "X-Shopify-Shop-Domain";
/// Shorter shop domain header accepted for older senders.
pub const HEADER_SHOP_DOMAIN_LEGACY: &str = "X-Shop-Domain";
/// Webhook topic header, e.g. `orders/fulfilled`.
pub const HEADER_TOPIC: &str = "X-Shopify-Topic";

type WebhookResponse = Result<(StatusCode, Json<Value>), ApiError>;

/// Handler for order webhooks.
///
/// POST /api/webhooks/shopify/orders
pub async fn handle_order_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> WebhookResponse {
    ingest(&state, &headers, body, Some(EventKind::OrderComplete)).await
}

/// Handler for refund webhooks.
///
/// POST /api/webhooks/shopify/refunds
pub async fn handle_refund_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> WebhookResponse {
    ingest(&state, &headers, body, Some(EventKind::Refund)).await
}

/// Handler for fulfillment webhooks.
///
/// POST /api/webhooks/shopify/fulfillments
pub async fn handle_fulfillment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> WebhookResponse {
    ingest(&state, &headers, body, Some(EventKind::FulfillmentCreate)).await
}

/// Handler for webhooks of any topic, resolved from `X-Shopify-Topic`.
///
/// POST /api/webhooks/shopify
pub async fn handle_topic_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> WebhookResponse {
    ingest(&state, &headers, body, None).await
}

async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
    kind: Option<EventKind>,
) -> WebhookResponse {
    // 1. Sender identity, checked before anything is read
    let shop = shop_domain(headers)?;

    // 2. Capture the body once, within the size limit
    let max_bytes = state.config.max_payload_bytes;
    check_declared_length(content_length(headers), max_bytes)?;
    let payload = capture(body.into_data_stream(), max_bytes).await?;

    // 3. Verify the signature over the captured bytes
    let signature = headers.get(HEADER_HMAC).and_then(|v| v.to_str().ok());
    if !state.verifier.verify(signature, payload.as_bytes()) {
        tracing::warn!("Webhook signature verification failed for shop {}", shop);
        return Err(ShophookError::Authentication.into());
    }

    // 4. Resolve the event kind
    let kind = match kind {
        Some(kind) => kind,
        None => {
            let topic = headers
                .get(HEADER_TOPIC)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::bad_request(format!("Missing {} header", HEADER_TOPIC)))?;

            match EventKind::from_topic(topic) {
                Some(kind) => kind,
                None => return unsupported(state, topic, &shop),
            }
        }
    };

    // 5. Process inline or hand off to the queue
    match state.config.delivery_mode(kind) {
        DeliveryMode::Queued => {
            validate_payload(kind, payload.as_bytes())?;
            let job_id = enqueue(state, kind, &shop, &payload).await?;
            Ok(queued(job_id))
        }
        DeliveryMode::Inline => process_inline(state, kind, &shop, payload).await,
    }
}

async fn process_inline(
    state: &AppState,
    kind: EventKind,
    shop: &str,
    payload: CapturedPayload,
) -> WebhookResponse {
    let err = match state.router.route(kind, payload.as_bytes()).await {
        Ok(()) => {
            tracing::debug!("Processed {} webhook from {}", kind, shop);
            return Ok((StatusCode::OK, Json(json!({"status": "processed"}))));
        }
        Err(e) => e,
    };

    if !err.is_retryable() || state.config.inline_failure == InlineFailure::Reject {
        return Err(err.into());
    }

    tracing::warn!(
        "Inline processing of {} webhook from {} failed, queueing for retry: {}",
        kind,
        shop,
        err
    );
    let job_id = enqueue(state, kind, shop, &payload).await?;
    Ok(queued(job_id))
}

async fn enqueue(
    state: &AppState,
    kind: EventKind,
    shop: &str,
    payload: &CapturedPayload,
) -> Result<JobId, ApiError> {
    let job_id = state
        .jobs
        .enqueue_from(&kind.context(), Some(shop), payload.as_bytes())
        .await?;

    tracing::info!("Queued {} webhook from {} as job {}", kind, shop, job_id);
    Ok(job_id)
}

fn queued(job_id: JobId) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "queued",
            "job_id": job_id.to_string()
        })),
    )
}

fn unsupported(state: &AppState, topic: &str, shop: &str) -> WebhookResponse {
    match state.router.unsupported_action(topic) {
        UnsupportedAction::Ignore => {
            tracing::info!("Ignoring unsupported webhook topic {} from {}", topic, shop);
            Ok((StatusCode::OK, Json(json!({"status": "ignored"}))))
        }
        UnsupportedAction::Reject => Err(ShophookError::UnsupportedEvent(topic.to_string()).into()),
    }
}

fn shop_domain(headers: &HeaderMap) -> Result<String, ShophookError> {
    [HEADER_SHOP_DOMAIN, HEADER_SHOP_DOMAIN_LEGACY]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(String::from)
        .ok_or(ShophookError::MissingHeader(HEADER_SHOP_DOMAIN))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_shop_domain_header_variants() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            shop_domain(&headers),
            Err(ShophookError::MissingHeader(_))
        ));

        headers.insert(HEADER_SHOP_DOMAIN_LEGACY, HeaderValue::from_static("legacy.myshopify.com"));
        assert_eq!(shop_domain(&headers).unwrap(), "legacy.myshopify.com");

        headers.insert(HEADER_SHOP_DOMAIN, HeaderValue::from_static("example.myshopify.com"));
        assert_eq!(shop_domain(&headers).unwrap(), "example.myshopify.com");
    }

    #[test]
    fn test_blank_shop_domain_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SHOP_DOMAIN, HeaderValue::from_static("  "));
        assert!(shop_domain(&headers).is_err());
    }
}
