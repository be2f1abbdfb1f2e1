//! SQLite-backed order service.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::{DbPool, format_ts};
use crate::error::{Result, ShophookError};
use crate::models::{Fulfillment, Money, Order, OrderTotals, Refund, RefundOutcome};
use crate::processor::OrderService;

/// Order state persisted in the `orders`, `refunds` and `fulfillments` tables.
#[derive(Debug, Clone)]
pub struct SqliteOrderStore {
    pool: DbPool,
}

impl SqliteOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of refunds recorded for an order.
    pub async fn refund_count(&self, order_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM refunds WHERE order_id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(count)
    }

    fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order> {
        let line_items: String = row.get("line_items");
        let status: String = row.get("status");

        Ok(Order {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            currency: row.get("currency"),
            line_items: serde_json::from_str(&line_items)?,
            totals: OrderTotals {
                subtotal: Money(row.get("subtotal_cents")),
                tax: Money(row.get("tax_cents")),
                total: Money(row.get("total_cents")),
            },
            status: status.parse().map_err(ShophookError::Storage)?,
            refunded: Money(row.get("refunded_cents")),
        })
    }
}

fn storage_error(e: sqlx::Error) -> ShophookError {
    ShophookError::Storage(e.to_string())
}

#[async_trait]
impl OrderService for SqliteOrderStore {
    async fn save_order(&self, order: &Order) -> Result<()> {
        let now = format_ts(&Utc::now());
        let line_items = serde_json::to_string(&order.line_items)?;

        // The refunded total belongs to refund processing and survives re-saves.
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, name, email, currency, line_items, subtotal_cents, tax_cents,
                total_cents, status, refunded_cents, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                currency = excluded.currency,
                line_items = excluded.line_items,
                subtotal_cents = excluded.subtotal_cents,
                tax_cents = excluded.tax_cents,
                total_cents = excluded.total_cents,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(order.id)
        .bind(&order.name)
        .bind(&order.email)
        .bind(&order.currency)
        .bind(&line_items)
        .bind(order.totals.subtotal.cents())
        .bind(order.totals.tax.cents())
        .bind(order.totals.total.cents())
        .bind(order.status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        tracing::info!("Saved order {} ({})", order.id, order.status);

        Ok(())
    }

    async fn process_refund(&self, refund: &Refund) -> Result<RefundOutcome> {
        let now = format_ts(&Utc::now());
        let refunded_items = serde_json::to_string(&refund.refunded_items)?;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // Write first so the transaction takes the write lock up front.
        // SQLite turns integer overflow into REAL, so the headroom is checked in the WHERE.
        let updated = sqlx::query(
            r#"
            UPDATE orders SET refunded_cents = refunded_cents + ?, updated_at = ?
            WHERE id = ? AND refunded_cents <= ?
            "#,
        )
        .bind(refund.amount.cents())
        .bind(&now)
        .bind(refund.order_id)
        .bind(i64::MAX.saturating_sub(refund.amount.cents()))
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM orders WHERE id = ?")
                .bind(refund.order_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?
                .is_some();
            tx.rollback().await.map_err(storage_error)?;

            if exists {
                return Err(ShophookError::Validation(format!(
                    "refund {}: refunded total of order {} out of range",
                    refund.id, refund.order_id
                )));
            }
            return Err(ShophookError::OrderNotFound(refund.order_id));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO refunds (id, order_id, amount_cents, refunded_items, applied_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(refund.id)
        .bind(refund.order_id)
        .bind(refund.amount.cents())
        .bind(&refunded_items)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_error)?;
            tracing::debug!("Refund {} already applied to order {}", refund.id, refund.order_id);
            return Ok(RefundOutcome::AlreadyApplied);
        }

        tx.commit().await.map_err(storage_error)?;

        tracing::info!(
            "Applied refund {} of {} to order {}",
            refund.id,
            refund.amount,
            refund.order_id
        );

        Ok(RefundOutcome::Applied)
    }

    async fn record_fulfillment(&self, fulfillment: &Fulfillment) -> Result<()> {
        let now = format_ts(&Utc::now());
        let tracking_numbers = serde_json::to_string(&fulfillment.tracking_numbers)?;

        sqlx::query(
            r#"
            INSERT INTO fulfillments (id, order_id, status, tracking_numbers, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                tracking_numbers = excluded.tracking_numbers,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(fulfillment.id)
        .bind(fulfillment.order_id)
        .bind(&fulfillment.status)
        .bind(&tracking_numbers)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        tracing::info!(
            "Recorded fulfillment {} for order {}",
            fulfillment.id,
            fulfillment.order_id
        );

        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, currency, line_items, subtotal_cents, tax_cents,
                   total_cents, status, refunded_cents
            FROM orders
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(|r| Self::row_to_order(&r)).transpose()
    }
}
