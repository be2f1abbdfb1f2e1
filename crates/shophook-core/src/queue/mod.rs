//! Durable webhook job queue: the store contract and retry scheduling.
//!
//! Jobs move `Pending -> Processing -> {Complete | Failed}`. A failed job with
//! a `next_attempt_at` becomes eligible again once that time passes; a failed
//! job without one is dead-lettered and waits for manual inspection. Nothing
//! ever leaves `Complete`.

pub mod retry;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{JobId, JobStats, JobStatus, WebhookJob};

pub use retry::RetryPolicy;

/// Storage contract for webhook jobs.
///
/// Implementations must be safe to share between request handlers and drain
/// workers. Claiming must be atomic so that at most one worker holds a job.
#[async_trait]
pub trait WebhookJobStore: Send + Sync {
    /// Persists a new pending job.
    async fn enqueue(&self, context: &str, payload: &[u8]) -> Result<JobId> {
        self.enqueue_from(context, None, payload).await
    }

    /// Persists a new pending job, recording which shop sent it.
    async fn enqueue_from(&self, context: &str, source: Option<&str>, payload: &[u8]) -> Result<JobId>;

    /// Gets a job by ID.
    async fn get(&self, id: &JobId) -> Result<Option<WebhookJob>>;

    /// Lists jobs eligible for processing, oldest first.
    ///
    /// Includes pending jobs and failed jobs whose retry time has passed.
    /// Never includes jobs that are currently claimed.
    async fn list_pending(&self, limit: i64) -> Result<Vec<WebhookJob>>;

    /// Atomically claims an eligible job for `lease`.
    ///
    /// Returns `None` if the job is not eligible, e.g. another worker claimed
    /// it first. A successful claim counts as an attempt.
    async fn claim(&self, id: &JobId, owner: &str, lease: Duration) -> Result<Option<WebhookJob>>;

    /// Marks a job claimed by `owner` complete.
    ///
    /// Completing a complete job is a no-op. A report from an owner whose
    /// lease was taken over is ignored.
    async fn mark_complete(&self, id: &JobId, owner: &str) -> Result<()>;

    /// Records a failed attempt on a job claimed by `owner`.
    ///
    /// `retry_at` schedules the next attempt; `None` dead-letters the job.
    /// A report from an owner whose lease was taken over is ignored.
    async fn mark_failed(
        &self,
        id: &JobId,
        owner: &str,
        error: &str,
        retry_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;

    /// Returns a job claimed by `owner` to pending without consuming an attempt.
    async fn release(&self, id: &JobId, owner: &str) -> Result<()>;

    /// Returns jobs whose lease expired to pending, or dead-letters them when
    /// `max_attempts` is used up. Returns the number of jobs reclaimed.
    async fn reclaim_expired(&self, max_attempts: u32) -> Result<u64>;

    /// Lists jobs, newest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<WebhookJob>>;

    /// Lists dead-lettered jobs, most recently failed first.
    async fn list_failed(&self, limit: i64) -> Result<Vec<WebhookJob>>;

    /// Puts a dead-lettered job back in the queue with a fresh attempt budget.
    ///
    /// Returns false if the job is not dead-lettered.
    async fn requeue(&self, id: &JobId) -> Result<bool>;

    /// Counts jobs per status.
    async fn stats(&self) -> Result<JobStats>;
}
