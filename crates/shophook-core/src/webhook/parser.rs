//! Webhook payload parsing for Shopify orders, refunds and fulfillments.
//!
//! Only the fields the processors need are decoded; everything else in the
//! platform payload is ignored.

use serde::Deserialize;

use crate::error::{Result, ShophookError};
use crate::models::{
    EventKind, Fulfillment, LineItem, Money, Order, OrderStatus, OrderTotals, Refund, RefundedItem,
};

/// Parses an order webhook payload.
pub fn parse_order(payload: &[u8]) -> Result<Order> {
    let data: ShopifyOrderPayload = decode(payload, "order")?;

    let line_items = data
        .line_items
        .into_iter()
        .map(|item| {
            Ok(LineItem {
                id: item.id,
                title: item.title.unwrap_or_default(),
                sku: item.sku.filter(|s| !s.is_empty()),
                quantity: item.quantity.unwrap_or(1),
                price: parse_amount(item.price.as_ref(), "line_items.price")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let status = if data.cancelled_at.is_some() {
        OrderStatus::Cancelled
    } else if data.closed_at.is_some() || data.fulfillment_status.as_deref() == Some("fulfilled") {
        OrderStatus::Closed
    } else {
        OrderStatus::Open
    };

    Ok(Order {
        id: data.id,
        name: data.name,
        email: data.email.filter(|e| !e.is_empty()),
        currency: data.currency,
        line_items,
        totals: OrderTotals {
            subtotal: parse_amount(data.subtotal_price.as_ref(), "subtotal_price")?,
            tax: parse_amount(data.total_tax.as_ref(), "total_tax")?,
            total: parse_amount(data.total_price.as_ref(), "total_price")?,
        },
        status,
        refunded: Money::ZERO,
    })
}

/// Parses a refund webhook payload.
///
/// The refunded amount is the sum of successful refund transactions, falling
/// back to the line item subtotals when the payload carries no transactions.
pub fn parse_refund(payload: &[u8]) -> Result<Refund> {
    let data: ShopifyRefundPayload = decode(payload, "refund")?;

    let refunded_items = data
        .refund_line_items
        .into_iter()
        .map(|item| {
            Ok(RefundedItem {
                line_item_id: item.line_item_id,
                quantity: item.quantity.unwrap_or(0),
                subtotal: parse_amount(item.subtotal.as_ref(), "refund_line_items.subtotal")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let refund_transactions: Vec<&ShopifyTransaction> = data
        .transactions
        .iter()
        .filter(|t| t.kind.as_deref().unwrap_or("refund") == "refund")
        .filter(|t| !matches!(t.status.as_deref(), Some("failure") | Some("error")))
        .collect();

    let amounts = if refund_transactions.is_empty() {
        refunded_items.iter().map(|i| i.subtotal).collect()
    } else {
        refund_transactions
            .into_iter()
            .map(|t| parse_amount(t.amount.as_ref(), "transactions.amount"))
            .collect::<Result<Vec<_>>>()?
    };

    let amount = Money::checked_sum(amounts).ok_or_else(|| {
        ShophookError::Validation(format!("refund {}: amount out of range", data.id))
    })?;

    if amount < Money::ZERO {
        return Err(ShophookError::Validation(format!(
            "refund {} has a negative amount",
            data.id
        )));
    }

    Ok(Refund {
        id: data.id,
        order_id: data.order_id,
        refunded_items,
        amount,
    })
}

/// Parses a fulfillment webhook payload.
pub fn parse_fulfillment(payload: &[u8]) -> Result<Fulfillment> {
    let data: ShopifyFulfillmentPayload = decode(payload, "fulfillment")?;

    let mut tracking_numbers = data.tracking_numbers;
    if let Some(number) = data.tracking_number
        && !number.is_empty()
        && !tracking_numbers.contains(&number)
    {
        tracking_numbers.push(number);
    }

    Ok(Fulfillment {
        id: data.id,
        order_id: data.order_id,
        status: data.status,
        tracking_numbers,
    })
}

/// Checks that `payload` decodes as the given kind without applying it.
pub fn validate_payload(kind: EventKind, payload: &[u8]) -> Result<()> {
    match kind {
        EventKind::OrderComplete => parse_order(payload).map(|_| ()),
        EventKind::Refund => parse_refund(payload).map(|_| ()),
        EventKind::FulfillmentCreate => parse_fulfillment(payload).map(|_| ()),
    }
}

fn decode<'a, T: Deserialize<'a>>(payload: &'a [u8], what: &str) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| ShophookError::Validation(format!("malformed {} payload: {}", what, e)))
}

fn parse_amount(raw: Option<&RawAmount>, field: &str) -> Result<Money> {
    let text = match raw {
        None => return Ok(Money::ZERO),
        Some(RawAmount::Text(s)) => s.clone(),
        Some(RawAmount::Number(n)) => n.to_string(),
    };

    text.parse()
        .map_err(|e| ShophookError::Validation(format!("{}: {}", field, e)))
}

// Shopify payload structures

/// Shopify sends money as decimal strings; some API versions use numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
struct ShopifyOrderPayload {
    id: i64,
    name: Option<String>,
    email: Option<String>,
    currency: Option<String>,
    subtotal_price: Option<RawAmount>,
    total_tax: Option<RawAmount>,
    total_price: Option<RawAmount>,
    fulfillment_status: Option<String>,
    closed_at: Option<String>,
    cancelled_at: Option<String>,
    #[serde(default)]
    line_items: Vec<ShopifyLineItem>,
}

#[derive(Deserialize)]
struct ShopifyLineItem {
    id: i64,
    title: Option<String>,
    sku: Option<String>,
    quantity: Option<i64>,
    price: Option<RawAmount>,
}

#[derive(Deserialize)]
struct ShopifyRefundPayload {
    id: i64,
    order_id: i64,
    #[serde(default)]
    refund_line_items: Vec<ShopifyRefundLineItem>,
    #[serde(default)]
    transactions: Vec<ShopifyTransaction>,
}

#[derive(Deserialize)]
struct ShopifyRefundLineItem {
    line_item_id: i64,
    quantity: Option<i64>,
    subtotal: Option<RawAmount>,
}

#[derive(Deserialize)]
struct ShopifyTransaction {
    amount: Option<RawAmount>,
    kind: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct ShopifyFulfillmentPayload {
    id: i64,
    order_id: i64,
    status: Option<String>,
    tracking_number: Option<String>,
    #[serde(default)]
    tracking_numbers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order() {
        let payload = br##"{
            "id": 820982911946154508,
            "name": "#9999",
            "email": "jon@example.com",
            "currency": "USD",
            "subtotal_price": "398.00",
            "total_tax": "11.94",
            "total_price": "409.94",
            "closed_at": "2024-01-10T11:00:00-05:00",
            "line_items": [
                {"id": 866550311766439020, "title": "IPod Nano - 8GB", "sku": "IPOD2008BLACK", "quantity": 2, "price": "199.00"}
            ]
        }"##;

        let order = parse_order(payload).unwrap();
        assert_eq!(order.id, 820982911946154508);
        assert_eq!(order.status, OrderStatus::Closed);
        assert_eq!(order.totals.total, Money(40994));
        assert_eq!(order.line_items.len(), 1);
        assert_eq!(order.line_items[0].price, Money(19900));
        assert_eq!(order.line_items[0].quantity, 2);
    }

    #[test]
    fn test_parse_minimal_order() {
        let order = parse_order(br#"{"id":123}"#).unwrap();
        assert_eq!(order.id, 123);
        assert_eq!(order.status, OrderStatus::Open);
        assert!(order.line_items.is_empty());
        assert_eq!(order.totals, OrderTotals::default());
    }

    #[test]
    fn test_order_missing_id_is_validation_error() {
        let err = parse_order(br##"{"name":"#1001"}"##).unwrap_err();
        assert!(matches!(err, ShophookError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_order_bad_amount_is_validation_error() {
        let err = parse_order(br#"{"id":1,"total_price":"ten"}"#).unwrap_err();
        assert!(matches!(err, ShophookError::Validation(_)));
    }

    #[test]
    fn test_parse_refund_from_transactions() {
        let payload = br#"{
            "id": 509562969,
            "order_id": 450789469,
            "refund_line_items": [{"line_item_id": 518995019, "quantity": 1, "subtotal": "199.00"}],
            "transactions": [
                {"amount": "41.94", "kind": "refund", "status": "success"},
                {"amount": "5.00", "kind": "refund", "status": "failure"}
            ]
        }"#;

        let refund = parse_refund(payload).unwrap();
        assert_eq!(refund.id, 509562969);
        assert_eq!(refund.order_id, 450789469);
        assert_eq!(refund.amount, Money(4194));
        assert_eq!(refund.refunded_items.len(), 1);
    }

    #[test]
    fn test_parse_refund_falls_back_to_line_items() {
        let payload = br#"{
            "id": 1,
            "order_id": 2,
            "refund_line_items": [
                {"line_item_id": 10, "quantity": 1, "subtotal": 12.5},
                {"line_item_id": 11, "quantity": 2, "subtotal": "7.50"}
            ]
        }"#;

        let refund = parse_refund(payload).unwrap();
        assert_eq!(refund.amount, Money(2000));
    }

    #[test]
    fn test_refund_total_overflow_is_validation_error() {
        let payload = br#"{
            "id": 1,
            "order_id": 2,
            "transactions": [
                {"amount": "92233720368547758.07", "kind": "refund", "status": "success"},
                {"amount": "92233720368547758.07", "kind": "refund", "status": "success"}
            ]
        }"#;

        let err = parse_refund(payload).unwrap_err();
        assert!(matches!(err, ShophookError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_refund_line_item_overflow_is_validation_error() {
        let payload = br#"{
            "id": 1,
            "order_id": 2,
            "refund_line_items": [
                {"line_item_id": 10, "subtotal": "92233720368547758.07"},
                {"line_item_id": 11, "subtotal": "0.01"}
            ]
        }"#;

        assert!(matches!(
            parse_refund(payload),
            Err(ShophookError::Validation(_))
        ));
    }

    #[test]
    fn test_refund_missing_order_id_is_validation_error() {
        let err = parse_refund(br#"{"id":1}"#).unwrap_err();
        assert!(matches!(err, ShophookError::Validation(_)));
    }

    #[test]
    fn test_parse_fulfillment_merges_tracking_numbers() {
        let payload = br#"{
            "id": 255858046,
            "order_id": 450789469,
            "status": "success",
            "tracking_number": "1Z2345",
            "tracking_numbers": ["1Z2345", "1Z9999"]
        }"#;

        let fulfillment = parse_fulfillment(payload).unwrap();
        assert_eq!(fulfillment.tracking_numbers, vec!["1Z2345", "1Z9999"]);
        assert_eq!(fulfillment.status.as_deref(), Some("success"));
    }

    #[test]
    fn test_validate_payload_by_kind() {
        let fulfillment = br#"{"id":1,"order_id":2}"#;

        assert!(validate_payload(EventKind::FulfillmentCreate, fulfillment).is_ok());
        assert!(validate_payload(EventKind::OrderComplete, fulfillment).is_ok());
        assert!(matches!(
            validate_payload(EventKind::Refund, br#"{"id":1}"#),
            Err(ShophookError::Validation(_))
        ));
        assert!(validate_payload(EventKind::FulfillmentCreate, b"[]").is_err());
    }
}
