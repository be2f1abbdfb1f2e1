//! Order, refund and fulfillment processing.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Fulfillment, Order, Refund, RefundOutcome};

/// Downstream order domain service.
///
/// Every operation must be idempotent: webhooks are delivered at least once,
/// and the same payload may be applied again by a sender retry or by a
/// drain-worker retry. Implementations report malformed input as
/// [`ShophookError::Validation`](crate::ShophookError::Validation) and backend
/// failures as [`ShophookError::Storage`](crate::ShophookError::Storage).
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Creates or updates an order keyed by its platform id.
    async fn save_order(&self, order: &Order) -> Result<()>;

    /// Applies a refund once per refund id.
    async fn process_refund(&self, refund: &Refund) -> Result<RefundOutcome>;

    /// Records a fulfillment keyed by its platform id.
    async fn record_fulfillment(&self, fulfillment: &Fulfillment) -> Result<()>;

    /// Gets an order by platform id.
    async fn get(&self, id: i64) -> Result<Option<Order>>;
}
