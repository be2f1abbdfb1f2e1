//! SQLite-backed webhook job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::time::Duration;

use super::{DbPool, format_ts, parse_opt_ts, parse_ts};
use crate::crypto::sha256_hex;
use crate::error::{Result, ShophookError};
use crate::models::{JobId, JobStats, JobStatus, WebhookJob};
use crate::queue::WebhookJobStore;

const JOB_COLUMNS: &str = r#"
    id, context, source, payload, payload_sha256, status, attempts, last_error,
    next_attempt_at, lease_owner, lease_expires_at, created_at, updated_at, completed_at
"#;

/// Webhook job store persisted in the `webhook_jobs` table.
///
/// Every state transition is a single conditional `UPDATE`, so concurrent
/// callers are serialized by SQLite and never need an in-process lock.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn exists(&self, id: &JobId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM webhook_jobs WHERE id = ? LIMIT 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<WebhookJob> {
        let id_str: String = row.get("id");
        let status_str: String = row.get("status");
        let attempts: i64 = row.get("attempts");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(WebhookJob {
            id: JobId::from_string(&id_str)
                .map_err(|e| ShophookError::Database(sqlx::Error::Decode(Box::new(e))))?,
            context: row.get("context"),
            source: row.get("source"),
            payload: row.get("payload"),
            payload_sha256: row.get("payload_sha256"),
            status: status_str
                .parse()
                .map_err(|e: String| ShophookError::Database(sqlx::Error::Decode(e.into())))?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.get("last_error"),
            next_attempt_at: parse_opt_ts("webhook_job.next_attempt_at", row.get("next_attempt_at"))?,
            lease_owner: row.get("lease_owner"),
            lease_expires_at: parse_opt_ts("webhook_job.lease_expires_at", row.get("lease_expires_at"))?,
            created_at: parse_ts("webhook_job.created_at", &created_at)?,
            updated_at: parse_ts("webhook_job.updated_at", &updated_at)?,
            completed_at: parse_opt_ts("webhook_job.completed_at", row.get("completed_at"))?,
        })
    }
}

fn persist_error(e: sqlx::Error) -> ShophookError {
    ShophookError::Persist(e.to_string())
}

#[async_trait]
impl WebhookJobStore for SqliteJobStore {
    async fn enqueue_from(&self, context: &str, source: Option<&str>, payload: &[u8]) -> Result<JobId> {
        let id = JobId::new();
        let now = format_ts(&Utc::now());

        sqlx::query(
            r#"
            INSERT INTO webhook_jobs (
                id, context, source, payload, payload_sha256, status, attempts,
                next_attempt_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(context)
        .bind(source)
        .bind(payload)
        .bind(sha256_hex(payload))
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(persist_error)?;

        tracing::debug!("Enqueued webhook job {} ({}, {} bytes)", id, context, payload.len());

        Ok(id)
    }

    async fn get(&self, id: &JobId) -> Result<Option<WebhookJob>> {
        let row = sqlx::query(&format!("SELECT {} FROM webhook_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<WebhookJob>> {
        let now = format_ts(&Utc::now());
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM webhook_jobs
            WHERE status = 'pending'
               OR (status = 'failed' AND next_attempt_at IS NOT NULL AND next_attempt_at <= ?)
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
            JOB_COLUMNS
        ))
        .bind(&now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(persist_error)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn claim(&self, id: &JobId, owner: &str, lease: Duration) -> Result<Option<WebhookJob>> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| ShophookError::Configuration(format!("Invalid lease duration: {}", e)))?;
        let now_str = format_ts(&now);

        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'processing',
                attempts = attempts + 1,
                lease_owner = ?,
                lease_expires_at = ?,
                updated_at = ?
            WHERE id = ?
              AND (status = 'pending'
                   OR (status = 'failed' AND next_attempt_at IS NOT NULL AND next_attempt_at <= ?))
            "#,
        )
        .bind(owner)
        .bind(format_ts(&(now + lease)))
        .bind(&now_str)
        .bind(id.to_string())
        .bind(&now_str)
        .execute(&self.pool)
        .await
        .map_err(persist_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get(id).await
    }

    async fn mark_complete(&self, id: &JobId, owner: &str) -> Result<()> {
        let now = format_ts(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'complete',
                completed_at = ?,
                updated_at = ?,
                next_attempt_at = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = ? AND status = 'processing' AND lease_owner = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(persist_error)?;

        if result.rows_affected() == 0 {
            if !self.exists(id).await? {
                return Err(ShophookError::JobNotFound(id.to_string()));
            }
            tracing::debug!("Ignoring completion of job {} from {}: lease not held", id, owner);
        }

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &JobId,
        owner: &str,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = format_ts(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'failed',
                last_error = ?,
                next_attempt_at = ?,
                updated_at = ?,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = ? AND status = 'processing' AND lease_owner = ?
            "#,
        )
        .bind(error)
        .bind(retry_at.as_ref().map(format_ts))
        .bind(&now)
        .bind(id.to_string())
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(persist_error)?;

        if result.rows_affected() == 0 {
            if !self.exists(id).await? {
                return Err(ShophookError::JobNotFound(id.to_string()));
            }
            tracing::debug!("Ignoring failure of job {} from {}: lease not held", id, owner);
        }

        Ok(())
    }

    async fn release(&self, id: &JobId, owner: &str) -> Result<()> {
        let now = format_ts(&Utc::now());
        sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'pending',
                attempts = MAX(attempts - 1, 0),
                updated_at = ?,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = ? AND status = 'processing' AND lease_owner = ?
            "#,
        )
        .bind(&now)
        .bind(id.to_string())
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(persist_error)?;

        Ok(())
    }

    async fn reclaim_expired(&self, max_attempts: u32) -> Result<u64> {
        let now = format_ts(&Utc::now());
        let mut tx = self.pool.begin().await.map_err(persist_error)?;

        let exhausted = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'failed',
                last_error = 'lease expired',
                next_attempt_at = NULL,
                updated_at = ?,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE status = 'processing' AND lease_expires_at < ? AND attempts >= ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(i64::from(max_attempts))
        .execute(&mut *tx)
        .await
        .map_err(persist_error)?;

        let requeued = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'pending',
                last_error = 'lease expired',
                updated_at = ?,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE status = 'processing' AND lease_expires_at < ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(persist_error)?;

        tx.commit().await.map_err(persist_error)?;

        if exhausted.rows_affected() > 0 {
            tracing::warn!(
                "Dead-lettered {} webhook jobs whose lease expired on their last attempt",
                exhausted.rows_affected()
            );
        }

        Ok(exhausted.rows_affected() + requeued.rows_affected())
    }

    async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<WebhookJob>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {} FROM webhook_jobs
                    WHERE status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                    JOB_COLUMNS
                ))
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {} FROM webhook_jobs
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                    JOB_COLUMNS
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_failed(&self, limit: i64) -> Result<Vec<WebhookJob>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM webhook_jobs
            WHERE status = 'failed' AND next_attempt_at IS NULL
            ORDER BY updated_at DESC, id DESC
            LIMIT ?
            "#,
            JOB_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn requeue(&self, id: &JobId) -> Result<bool> {
        let now = format_ts(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'pending',
                attempts = 0,
                next_attempt_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'failed' AND next_attempt_at IS NULL
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(persist_error)?;

        if result.rows_affected() == 0 && !self.exists(id).await? {
            return Err(ShophookError::JobNotFound(id.to_string()));
        }

        Ok(result.rows_affected() == 1)
    }

    async fn stats(&self) -> Result<JobStats> {
        let rows = sqlx::query(
            r#"
            SELECT status,
                   COUNT(*) AS total,
                   SUM(CASE WHEN next_attempt_at IS NULL THEN 1 ELSE 0 END) AS unscheduled
            FROM webhook_jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.get("status");
            let total: i64 = row.get("total");
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending = total,
                Ok(JobStatus::Processing) => stats.processing = total,
                Ok(JobStatus::Complete) => stats.complete = total,
                Ok(JobStatus::Failed) => {
                    stats.failed = total;
                    stats.dead_lettered = row.get("unscheduled");
                }
                Err(e) => tracing::warn!("Skipping unknown job status in stats: {}", e),
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations, test_pool};
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(60);

    async fn store() -> SqliteJobStore {
        SqliteJobStore::new(test_pool().await)
    }

    #[tokio::test]
    async fn test_enqueue_then_list_pending_preserves_payload() {
        let store = store().await;
        let payload: Vec<u8> = br#"{"id":123,"note":"cafe"}"#
            .iter()
            .copied()
            .chain([0xff, 0x00, 0x7f])
            .collect();

        let id = store.enqueue("shopify:order_complete", &payload).await.unwrap();
        let pending = store.list_pending(10).await.unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].payload, payload);
        assert_eq!(pending[0].payload_sha256, sha256_hex(&payload));
        assert_eq!(pending[0].status, JobStatus::Pending);
        assert_eq!(pending[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_list_pending_is_oldest_first() {
        let store = store().await;
        let first = store.enqueue("shopify:refund", b"1").await.unwrap();
        let second = store.enqueue("shopify:refund", b"2").await.unwrap();
        let third = store.enqueue("shopify:refund", b"3").await.unwrap();

        let ids: Vec<JobId> = store
            .list_pending(10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_claim_hides_job_from_pending() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();

        let job = store.claim(&id, "worker-a", LEASE).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.lease_owner.as_deref(), Some("worker-a"));

        assert!(store.list_pending(10).await.unwrap().is_empty());
        assert!(store.claim(&id, "worker-b", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_complete_is_idempotent() {
        let store = store().await;
        let id = store.enqueue("shopify:order_complete", b"{}").await.unwrap();
        store.claim(&id, "worker", LEASE).await.unwrap();

        store.mark_complete(&id, "worker").await.unwrap();
        let first = store.get(&id).await.unwrap().unwrap();
        store.mark_complete(&id, "worker").await.unwrap();
        let second = store.get(&id).await.unwrap().unwrap();

        assert_eq!(second.status, JobStatus::Complete);
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[tokio::test]
    async fn test_mark_complete_unknown_job() {
        let store = store().await;
        let err = store.mark_complete(&JobId::new(), "worker").await.unwrap_err();
        assert!(matches!(err, ShophookError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_job_never_transitions_again() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();
        store.claim(&id, "worker", LEASE).await.unwrap();
        store.mark_complete(&id, "worker").await.unwrap();

        store.mark_failed(&id, "worker", "late failure", None).await.unwrap();
        store.release(&id, "worker").await.unwrap();
        assert!(store.claim(&id, "worker", LEASE).await.unwrap().is_none());
        assert!(!store.requeue(&id).await.unwrap());

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_failed_job_waits_for_retry_time() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();
        store.claim(&id, "worker", LEASE).await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        store.mark_failed(&id, "worker", "storage down", Some(later)).await.unwrap();

        assert!(store.list_pending(10).await.unwrap().is_empty());
        assert!(store.claim(&id, "worker", LEASE).await.unwrap().is_none());

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("storage down"));
        assert!(!job.is_dead_lettered());
    }

    #[tokio::test]
    async fn test_due_failed_job_is_retried() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();
        store.claim(&id, "worker", LEASE).await.unwrap();

        let earlier = Utc::now() - chrono::Duration::seconds(1);
        store.mark_failed(&id, "worker", "storage down", Some(earlier)).await.unwrap();

        let pending = store.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        let job = store.claim(&id, "worker", LEASE).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_dead_lettered_job_is_surfaced_and_requeueable() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();
        store.claim(&id, "worker", LEASE).await.unwrap();
        store.mark_failed(&id, "worker", "gave up", None).await.unwrap();

        assert!(store.list_pending(10).await.unwrap().is_empty());
        let failed = store.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].is_dead_lettered());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dead_lettered, 1);

        assert!(store.requeue(&id).await.unwrap());
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(store.list_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_returns_attempt() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();
        store.claim(&id, "worker", LEASE).await.unwrap();
        store.release(&id, "worker").await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.lease_owner.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = store().await;
        let retry = store.enqueue("shopify:refund", b"a").await.unwrap();
        let exhausted = store.enqueue("shopify:refund", b"b").await.unwrap();
        let live = store.enqueue("shopify:refund", b"c").await.unwrap();

        store.claim(&retry, "crashed", Duration::ZERO).await.unwrap();
        store.claim(&exhausted, "crashed", Duration::ZERO).await.unwrap();
        store.claim(&live, "healthy", LEASE).await.unwrap();

        // Burn the remaining attempts on `exhausted`.
        sqlx::query("UPDATE webhook_jobs SET attempts = 3 WHERE id = ?")
            .bind(exhausted.to_string())
            .execute(store.pool())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let reclaimed = store.reclaim_expired(3).await.unwrap();
        assert_eq!(reclaimed, 2);

        let retry = store.get(&retry).await.unwrap().unwrap();
        assert_eq!(retry.status, JobStatus::Pending);
        assert_eq!(retry.attempts, 1);

        let exhausted = store.get(&exhausted).await.unwrap().unwrap();
        assert!(exhausted.is_dead_lettered());

        let live = store.get(&live).await.unwrap().unwrap();
        assert_eq!(live.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_stale_owner_cannot_touch_reclaimed_job() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();

        store.claim(&id, "worker-a", Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.reclaim_expired(5).await.unwrap(), 1);
        store.claim(&id, "worker-b", LEASE).await.unwrap().unwrap();

        let past = Utc::now() - chrono::Duration::seconds(1);
        store.mark_failed(&id, "worker-a", "late failure", Some(past)).await.unwrap();
        store.mark_complete(&id, "worker-a").await.unwrap();
        store.release(&id, "worker-a").await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.lease_owner.as_deref(), Some("worker-b"));
        assert_eq!(job.attempts, 2);
        assert!(job.last_error.as_deref() != Some("late failure"));
        assert!(store.claim(&id, "worker-c", LEASE).await.unwrap().is_none());

        store.mark_complete(&id, "worker-b").await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_stale_owner_cannot_complete_requeued_job() {
        let store = store().await;
        let id = store.enqueue("shopify:refund", b"{}").await.unwrap();

        store.claim(&id, "worker-a", Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.reclaim_expired(5).await.unwrap();

        store.mark_complete(&id, "worker-a").await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let dir = std::env::temp_dir().join(format!("shophook-claims-{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let url = format!("sqlite://{}", dir.join("jobs.db").display());
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqliteJobStore::new(pool));

        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(store.enqueue("shopify:refund", format!("{}", i).as_bytes()).await.unwrap());
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                let owner = format!("worker-{}", worker);
                let mut won = Vec::new();
                for id in ids {
                    if store.claim(&id, &owner, LEASE).await.unwrap().is_some() {
                        won.push(id);
                    }
                }
                won
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.unwrap());
        }

        assert_eq!(claimed.len(), ids.len());
        let unique: std::collections::HashSet<_> = claimed.iter().collect();
        assert_eq!(unique.len(), ids.len());

        for id in &ids {
            assert_eq!(store.get(id).await.unwrap().unwrap().attempts, 1);
        }

        store.pool().close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
