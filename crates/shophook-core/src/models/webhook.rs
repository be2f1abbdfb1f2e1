//! Webhook job models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Namespace for every job produced by the Shopify endpoints.
pub const SHOPIFY_CONTEXT: &str = "shopify";

/// Unique identifier for a webhook job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// Lifecycle state of a webhook job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Kinds of webhook events this system processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// All shipments completed and the order is closed.
    OrderComplete,
    Refund,
    /// A shipment was created for an order.
    FulfillmentCreate,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::OrderComplete,
        EventKind::Refund,
        EventKind::FulfillmentCreate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderComplete => "order_complete",
            EventKind::Refund => "refund",
            EventKind::FulfillmentCreate => "fulfillment_create",
        }
    }

    /// Maps a Shopify webhook topic (`X-Shopify-Topic`) to an event kind.
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic.trim().to_lowercase().as_str() {
            "orders/fulfilled" | "orders/paid" | "orders/updated" | "orders/create" => {
                Some(EventKind::OrderComplete)
            }
            "refunds/create" => Some(EventKind::Refund),
            "fulfillments/create" => Some(EventKind::FulfillmentCreate),
            _ => None,
        }
    }

    /// Job context string for this kind, e.g. `shopify:refund`.
    pub fn context(&self) -> String {
        format!("{}:{}", SHOPIFY_CONTEXT, self.as_str())
    }

    /// Derives the event kind from a job context.
    pub fn from_context(context: &str) -> Option<Self> {
        let (namespace, kind) = context.split_once(':')?;
        if namespace != SHOPIFY_CONTEXT {
            return None;
        }
        kind.parse().ok()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "order_complete" => Ok(EventKind::OrderComplete),
            "refund" => Ok(EventKind::Refund),
            "fulfillment_create" => Ok(EventKind::FulfillmentCreate),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

/// A durably stored webhook delivery awaiting (or done with) processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJob {
    pub id: JobId,
    pub context: String,
    /// Shop domain that sent the webhook.
    pub source: Option<String>,
    #[serde(skip_serializing)]
    pub payload: Vec<u8>,
    pub payload_sha256: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// When a failed job becomes eligible again. `None` on a terminal failure.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookJob {
    /// Event kind derived from the job context.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_context(&self.context)
    }

    /// A failed job with no scheduled retry needs manual attention.
    pub fn is_dead_lettered(&self) -> bool {
        self.status == JobStatus::Failed && self.next_attempt_at.is_none()
    }
}

/// API response DTO for a webhook job (excludes raw payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJobResponse {
    pub id: String,
    pub context: String,
    pub source: Option<String>,
    pub payload_sha256: String,
    pub payload_size: usize,
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub dead_lettered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<WebhookJob> for WebhookJobResponse {
    fn from(job: WebhookJob) -> Self {
        let dead_lettered = job.is_dead_lettered();
        Self {
            id: job.id.to_string(),
            payload_size: job.payload.len(),
            context: job.context,
            source: job.source,
            payload_sha256: job.payload_sha256,
            status: job.status.as_str().to_string(),
            attempts: job.attempts,
            last_error: job.last_error,
            next_attempt_at: job.next_attempt_at,
            dead_lettered,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub complete: i64,
    pub failed: i64,
    pub dead_lettered: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_roundtrip_for_every_kind() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_context(&kind.context()), Some(kind));
        }
    }

    #[test]
    fn test_foreign_context_is_rejected() {
        assert_eq!(EventKind::from_context("stripe:refund"), None);
        assert_eq!(EventKind::from_context("shopify"), None);
        assert_eq!(EventKind::from_context("shopify:carts_create"), None);
    }

    #[test]
    fn test_topic_mapping() {
        assert_eq!(EventKind::from_topic("orders/fulfilled"), Some(EventKind::OrderComplete));
        assert_eq!(EventKind::from_topic("Refunds/Create"), Some(EventKind::Refund));
        assert_eq!(
            EventKind::from_topic("fulfillments/create"),
            Some(EventKind::FulfillmentCreate)
        );
        assert_eq!(EventKind::from_topic("carts/create"), None);
    }
}
