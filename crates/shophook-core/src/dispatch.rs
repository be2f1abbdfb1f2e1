//! Routes verified webhook payloads to the order service.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, ShophookError};
use crate::models::{EventKind, RefundOutcome};
use crate::processor::OrderService;
use crate::webhook::{parse_fulfillment, parse_order, parse_refund};

/// What to do with an event this system does not handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedAction {
    /// Log and acknowledge so the sender stops redelivering.
    Ignore,
    /// Fail the delivery.
    Reject,
}

impl std::str::FromStr for UnsupportedAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(UnsupportedAction::Ignore),
            "reject" => Ok(UnsupportedAction::Reject),
            _ => Err(format!("Unknown unsupported-event action: {}", s)),
        }
    }
}

/// Per-topic policy for unsupported events.
#[derive(Debug, Clone)]
pub struct UnsupportedEventPolicy {
    default: UnsupportedAction,
    overrides: HashMap<String, UnsupportedAction>,
}

impl Default for UnsupportedEventPolicy {
    fn default() -> Self {
        Self::new(UnsupportedAction::Ignore)
    }
}

impl UnsupportedEventPolicy {
    pub fn new(default: UnsupportedAction) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Overrides the action for one topic or job context.
    pub fn with_override(mut self, topic: impl Into<String>, action: UnsupportedAction) -> Self {
        self.overrides
            .insert(topic.into().trim().to_lowercase(), action);
        self
    }

    pub fn action_for(&self, topic: &str) -> UnsupportedAction {
        self.overrides
            .get(&topic.trim().to_lowercase())
            .copied()
            .unwrap_or(self.default)
    }
}

/// Maps event kinds to handlers.
///
/// Each route parses its own payload and calls exactly one order service
/// operation; routes share nothing but the service handle.
#[derive(Clone)]
pub struct DispatchRouter {
    orders: Arc<dyn OrderService>,
    policy: UnsupportedEventPolicy,
}

impl DispatchRouter {
    pub fn new(orders: Arc<dyn OrderService>, policy: UnsupportedEventPolicy) -> Self {
        Self { orders, policy }
    }

    /// Action for an unsupported topic or context.
    pub fn unsupported_action(&self, topic: &str) -> UnsupportedAction {
        self.policy.action_for(topic)
    }

    /// Parses `payload` and applies it for `kind`.
    pub async fn route(&self, kind: EventKind, payload: &[u8]) -> Result<()> {
        match kind {
            EventKind::OrderComplete => {
                let order = parse_order(payload)?;
                self.orders.save_order(&order).await
            }
            EventKind::Refund => {
                let refund = parse_refund(payload)?;
                match self.orders.process_refund(&refund).await? {
                    RefundOutcome::Applied => {}
                    RefundOutcome::AlreadyApplied => {
                        tracing::info!("Refund {} was already applied, skipping", refund.id);
                    }
                }
                Ok(())
            }
            EventKind::FulfillmentCreate => {
                let fulfillment = parse_fulfillment(payload)?;
                self.orders.record_fulfillment(&fulfillment).await
            }
        }
    }

    /// Routes by platform topic, e.g. `refunds/create`.
    pub async fn route_topic(&self, topic: &str, payload: &[u8]) -> Result<EventKind> {
        let kind = EventKind::from_topic(topic)
            .ok_or_else(|| ShophookError::UnsupportedEvent(topic.to_string()))?;
        self.route(kind, payload).await?;
        Ok(kind)
    }

    /// Routes by job context, e.g. `shopify:refund`.
    pub async fn route_context(&self, context: &str, payload: &[u8]) -> Result<EventKind> {
        let kind = EventKind::from_context(context)
            .ok_or_else(|| ShophookError::UnsupportedEvent(context.to_string()))?;
        self.route(kind, payload).await?;
        Ok(kind)
    }
}

impl std::fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fulfillment, Order, Refund};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingOrders {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingOrders {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderService for RecordingOrders {
        async fn save_order(&self, order: &Order) -> Result<()> {
            self.calls.lock().unwrap().push(format!("order:{}", order.id));
            Ok(())
        }

        async fn process_refund(&self, refund: &Refund) -> Result<RefundOutcome> {
            self.calls.lock().unwrap().push(format!("refund:{}", refund.id));
            Ok(RefundOutcome::Applied)
        }

        async fn record_fulfillment(&self, fulfillment: &Fulfillment) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("fulfillment:{}", fulfillment.id));
            Ok(())
        }

        async fn get(&self, _id: i64) -> Result<Option<Order>> {
            Ok(None)
        }
    }

    fn router() -> (DispatchRouter, Arc<RecordingOrders>) {
        let orders = Arc::new(RecordingOrders::default());
        let router = DispatchRouter::new(orders.clone(), UnsupportedEventPolicy::default());
        (router, orders)
    }

    const ORDER: &[u8] = br#"{"id":123,"total_price":"10.00","line_items":[]}"#;
    const REFUND: &[u8] = br#"{"id":9,"order_id":123,"refund_line_items":[],"transactions":[{"amount":"5.00","kind":"refund","status":"success"}]}"#;
    const FULFILLMENT: &[u8] = br#"{"id":55,"order_id":123,"status":"success"}"#;

    #[tokio::test]
    async fn test_each_kind_reaches_its_handler() {
        let (router, orders) = router();

        router.route(EventKind::OrderComplete, ORDER).await.unwrap();
        router.route(EventKind::Refund, REFUND).await.unwrap();
        router.route(EventKind::FulfillmentCreate, FULFILLMENT).await.unwrap();

        assert_eq!(orders.calls(), vec!["order:123", "refund:9", "fulfillment:55"]);
    }

    #[tokio::test]
    async fn test_route_topic_and_context() {
        let (router, orders) = router();

        let kind = router.route_topic("orders/fulfilled", ORDER).await.unwrap();
        assert_eq!(kind, EventKind::OrderComplete);

        let kind = router.route_context("shopify:refund", REFUND).await.unwrap();
        assert_eq!(kind, EventKind::Refund);

        assert_eq!(orders.calls(), vec!["order:123", "refund:9"]);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_unsupported() {
        let (router, orders) = router();

        let err = router.route_topic("carts/create", b"{}").await.unwrap_err();
        assert!(matches!(err, ShophookError::UnsupportedEvent(t) if t == "carts/create"));

        let err = router.route_context("github", b"{}").await.unwrap_err();
        assert!(matches!(err, ShophookError::UnsupportedEvent(_)));

        assert!(orders.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_service() {
        let (router, orders) = router();

        let err = router.route(EventKind::Refund, b"not json").await.unwrap_err();
        assert!(matches!(err, ShophookError::Validation(_)));
        assert!(orders.calls().is_empty());
    }

    #[test]
    fn test_policy_overrides() {
        let policy = UnsupportedEventPolicy::new(UnsupportedAction::Ignore)
            .with_override("Carts/Create", UnsupportedAction::Reject);

        assert_eq!(policy.action_for("carts/create"), UnsupportedAction::Reject);
        assert_eq!(policy.action_for("checkouts/create"), UnsupportedAction::Ignore);

        let strict = UnsupportedEventPolicy::new(UnsupportedAction::Reject)
            .with_override("app/uninstalled", UnsupportedAction::Ignore);
        assert_eq!(strict.action_for("app/uninstalled"), UnsupportedAction::Ignore);
        assert_eq!(strict.action_for("carts/update"), UnsupportedAction::Reject);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("ignore".parse::<UnsupportedAction>().unwrap(), UnsupportedAction::Ignore);
        assert_eq!(" REJECT ".parse::<UnsupportedAction>().unwrap(), UnsupportedAction::Reject);
        assert!("drop".parse::<UnsupportedAction>().is_err());
    }
}
