//! Order, refund and fulfillment models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monetary amount in minor units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Sums amounts, returning `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl std::str::FromStr for Money {
    type Err = String;

    /// Parses platform decimal strings such as `"10.5"`, `"199.99"` or `"-3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(format!("Invalid amount: {:?}", s));
        }
        if fraction.len() > 2 {
            return Err(format!("Invalid amount (more than two decimals): {:?}", s));
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(format!("Invalid amount: {:?}", s));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| format!("Invalid amount: {:?}", s))?
        };
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| format!("Invalid amount: {:?}", s))? * 10,
            _ => fraction.parse().map_err(|_| format!("Invalid amount: {:?}", s))?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(fraction))
            .ok_or_else(|| format!("Amount out of range: {:?}", s))?;

        Ok(Money(if negative { -cents } else { cents }))
    }
}

/// Order lifecycle as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Closed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Closed => "closed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(OrderStatus::Open),
            "closed" => Ok(OrderStatus::Closed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub title: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub price: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

/// An order as saved by the order processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Platform order id; the idempotency key.
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub currency: Option<String>,
    pub line_items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub status: OrderStatus,
    /// Sum of all applied refunds. Maintained by refund processing only.
    #[serde(default)]
    pub refunded: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundedItem {
    pub line_item_id: i64,
    pub quantity: i64,
    pub subtotal: Money,
}

/// A refund against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// Platform refund id; the idempotency key.
    pub id: i64,
    pub order_id: i64,
    pub refunded_items: Vec<RefundedItem>,
    pub amount: Money,
}

/// Result of applying a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Applied,
    /// The refund id was recorded before; nothing changed.
    AlreadyApplied,
}

/// A shipment created for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    /// Platform fulfillment id; the idempotency key.
    pub id: i64,
    pub order_id: i64,
    pub status: Option<String>,
    pub tracking_numbers: Vec<String>,
}

/// API response DTO for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub currency: Option<String>,
    pub status: String,
    pub line_items: Vec<LineItem>,
    pub subtotal: String,
    pub tax: String,
    pub total: String,
    pub refunded: String,
    pub fetched_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            name: order.name,
            email: order.email,
            currency: order.currency,
            status: order.status.as_str().to_string(),
            line_items: order.line_items,
            subtotal: order.totals.subtotal.to_string(),
            tax: order.totals.tax.to_string(),
            total: order.totals.total.to_string(),
            refunded: order.refunded.to_string(),
            fetched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_parsing() {
        assert_eq!("10.00".parse::<Money>().unwrap(), Money(1000));
        assert_eq!("199.99".parse::<Money>().unwrap(), Money(19999));
        assert_eq!("10.5".parse::<Money>().unwrap(), Money(1050));
        assert_eq!("7".parse::<Money>().unwrap(), Money(700));
        assert_eq!(".25".parse::<Money>().unwrap(), Money(25));
        assert_eq!("-3.10".parse::<Money>().unwrap(), Money(-310));
    }

    #[test]
    fn test_money_checked_sum() {
        assert_eq!(Money::checked_sum([Money(150), Money(250)]), Some(Money(400)));
        assert_eq!(Money::checked_sum([]), Some(Money::ZERO));
        assert_eq!(Money::checked_sum([Money(i64::MAX), Money(1)]), None);
    }

    #[test]
    fn test_money_parsing_rejects_garbage() {
        assert!("".parse::<Money>().is_err());
        assert!(".".parse::<Money>().is_err());
        assert!("1.234".parse::<Money>().is_err());
        assert!("12a".parse::<Money>().is_err());
        assert!("1,00".parse::<Money>().is_err());
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money(1050).to_string(), "10.50");
        assert_eq!(Money(5).to_string(), "0.05");
        assert_eq!(Money(-310).to_string(), "-3.10");
    }
}
