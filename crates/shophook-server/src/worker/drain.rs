//! Queue drain worker.
//!
//! Periodically claims eligible webhook jobs and runs them through the
//! dispatch router with bounded concurrency. Failed attempts are rescheduled
//! with exponential backoff until the retry budget runs out, after which the
//! job is dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use shophook_core::{
    Result, ShophookError,
    dispatch::{DispatchRouter, UnsupportedAction},
    models::{JobId, WebhookJob},
    queue::{RetryPolicy, WebhookJobStore},
};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::config::env_or;

/// Drain worker configuration.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Time between drain cycles.
    pub interval: Duration,
    /// Maximum jobs processed at once.
    pub concurrency: usize,
    /// Maximum jobs listed per cycle.
    pub batch_size: i64,
    /// Time limit for a single processing attempt.
    pub job_timeout: Duration,
    /// How long a claim is held before another worker may reclaim the job.
    pub lease: Duration,
    /// Time in-flight jobs get to finish after shutdown is signalled.
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            concurrency: 4,
            batch_size: 50,
            job_timeout: Duration::from_secs(30),
            lease: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl DrainConfig {
    /// Loads config from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            interval: secs("SHOPHOOK_DRAIN_INTERVAL_SECS", defaults.interval)?,
            concurrency: env_or("SHOPHOOK_DRAIN_CONCURRENCY", defaults.concurrency)?,
            batch_size: env_or("SHOPHOOK_DRAIN_BATCH_SIZE", defaults.batch_size)?,
            job_timeout: secs("SHOPHOOK_JOB_TIMEOUT_SECS", defaults.job_timeout)?,
            lease: secs("SHOPHOOK_LEASE_SECS", defaults.lease)?,
            shutdown_grace: secs("SHOPHOOK_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace)?,
            retry: RetryPolicy {
                max_attempts: env_or("SHOPHOOK_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: secs("SHOPHOOK_BACKOFF_BASE_SECS", defaults.retry.base_delay)?,
                max_delay: secs("SHOPHOOK_BACKOFF_MAX_SECS", defaults.retry.max_delay)?,
            },
        };

        if config.interval.is_zero()
            || config.concurrency == 0
            || config.batch_size <= 0
            || config.retry.max_attempts == 0
        {
            return Err(ShophookError::Configuration(
                "Drain interval, concurrency, batch size and max attempts must be positive"
                    .to_string(),
            ));
        }

        // A lease shorter than the attempt timeout lets a second worker
        // reclaim a job that is still running.
        if config.lease < config.job_timeout {
            return Err(ShophookError::Configuration(
                "SHOPHOOK_LEASE_SECS must be at least SHOPHOOK_JOB_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(config)
    }
}

fn secs(name: &str, default: Duration) -> Result<Duration> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}

/// How a single job attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Unsupported context acknowledged under the ignore policy.
    Ignored,
    /// Failed, another attempt is scheduled.
    Retrying,
    /// Failed terminally.
    DeadLettered,
}

/// Counts for one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Jobs returned to the queue after their lease expired.
    pub reclaimed: u64,
    pub claimed: usize,
    pub completed: usize,
    pub ignored: usize,
    pub retrying: usize,
    pub dead_lettered: usize,
    /// Jobs aborted by shutdown and released back to pending.
    pub interrupted: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Ignored => self.ignored += 1,
            JobOutcome::Retrying => self.retrying += 1,
            JobOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Jobs claimed by this worker and not yet settled, with their attempt number.
pub type InFlightJobs = Arc<DashMap<JobId, u32>>;

/// Drains the webhook job queue.
#[derive(Clone)]
pub struct DrainWorker {
    jobs: Arc<dyn WebhookJobStore>,
    router: Arc<DispatchRouter>,
    config: Arc<DrainConfig>,
    owner: Arc<str>,
    in_flight: InFlightJobs,
}

impl DrainWorker {
    pub fn new(
        jobs: Arc<dyn WebhookJobStore>,
        router: Arc<DispatchRouter>,
        config: DrainConfig,
    ) -> Self {
        let owner = format!("shophookd-{}", ulid::Ulid::new());

        Self {
            jobs,
            router,
            config: Arc::new(config),
            owner: owner.into(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Lease owner recorded on claimed jobs.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Runs a single drain cycle to completion.
    pub async fn run_once(&self) -> Result<DrainReport> {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.run_cycle(&mut shutdown_rx).await
    }

    /// Runs a drain cycle that stops early when `shutdown` flips to true.
    ///
    /// After shutdown no new jobs are claimed. Jobs already running get the
    /// configured grace period, then are aborted and released to pending.
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<DrainReport> {
        let mut report = DrainReport {
            reclaimed: self.jobs.reclaim_expired(self.config.retry.max_attempts).await?,
            ..Default::default()
        };

        let pending = self.jobs.list_pending(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut stopping = *shutdown.borrow();

        for candidate in pending {
            if stopping {
                break;
            }

            // Take a permit before claiming so queued jobs do not burn lease time.
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    stopping = changed.is_err() || *shutdown.borrow();
                    if stopping {
                        break;
                    }
                    continue;
                }
            };

            let job = match self
                .jobs
                .claim(&candidate.id, &self.owner, self.config.lease)
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tracing::debug!("Job {} was claimed elsewhere, skipping", candidate.id);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to claim job {}: {}", candidate.id, e);
                    continue;
                }
            };

            report.claimed += 1;
            self.in_flight.insert(job.id.clone(), job.attempts);

            let worker = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.process(job).await
            });
        }

        self.settle(&mut tasks, &mut report, shutdown, stopping).await;
        self.fail_abandoned(&mut report).await;

        Ok(report)
    }

    /// Waits for spawned jobs, enforcing the shutdown grace period.
    async fn settle(
        &self,
        tasks: &mut JoinSet<JobOutcome>,
        report: &mut DrainReport,
        shutdown: &mut watch::Receiver<bool>,
        mut stopping: bool,
    ) {
        while !stopping {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => report.record(outcome),
                    Some(Err(e)) => tracing::error!("Drain task failed: {}", e),
                    None => return,
                },
                changed = shutdown.changed() => {
                    stopping = changed.is_err() || *shutdown.borrow();
                }
            }
        }

        let grace = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => report.record(outcome),
                    Some(Err(e)) => tracing::error!("Drain task failed: {}", e),
                    None => return,
                },
                _ = &mut grace => break,
            }
        }

        tracing::warn!(
            "Shutdown grace period elapsed, aborting {} in-flight jobs",
            tasks.len()
        );
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(outcome) = joined {
                report.record(outcome);
            }
        }

        report.interrupted = self.release_in_flight().await;
    }

    /// Releases every job this worker still holds. Returns how many were released.
    async fn release_in_flight(&self) -> usize {
        let ids: Vec<JobId> = self.in_flight.iter().map(|e| e.key().clone()).collect();

        for id in &ids {
            match self.jobs.release(id, &self.owner).await {
                Ok(()) => tracing::info!("Released interrupted job {}", id),
                // The lease expires and the job is reclaimed later.
                Err(e) => tracing::error!("Failed to release job {}: {}", id, e),
            }
            self.in_flight.remove(id);
        }

        ids.len()
    }

    /// Fails jobs whose task ended without recording an outcome, which only
    /// happens when processing panicked.
    async fn fail_abandoned(&self, report: &mut DrainReport) {
        let abandoned: Vec<(JobId, u32)> = self
            .in_flight
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        for (id, attempts) in abandoned {
            let retry_at = self.config.retry.next_attempt_at(attempts, Utc::now());
            if let Err(e) = self
                .jobs
                .mark_failed(&id, &self.owner, "processing panicked", retry_at)
                .await
            {
                tracing::error!("Failed to record failure of job {}: {}", id, e);
            }

            tracing::error!("Job {} panicked during attempt {}", id, attempts);
            report.record(if retry_at.is_some() {
                JobOutcome::Retrying
            } else {
                JobOutcome::DeadLettered
            });
            self.in_flight.remove(&id);
        }
    }

    /// Runs one attempt of a claimed job and records the result.
    pub async fn process(&self, job: WebhookJob) -> JobOutcome {
        tracing::debug!(
            "Processing job {} ({}), attempt {}",
            job.id,
            job.context,
            job.attempts
        );

        let attempt = tokio::time::timeout(
            self.config.job_timeout,
            self.router.route_context(&job.context, &job.payload),
        )
        .await;

        let result = match attempt {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(ShophookError::Timeout(self.config.job_timeout.as_secs())),
        };

        let outcome = match result {
            Ok(()) => self.complete(&job, JobOutcome::Completed).await,
            Err(ShophookError::UnsupportedEvent(context)) => {
                match self.router.unsupported_action(&context) {
                    UnsupportedAction::Ignore => {
                        tracing::info!("Ignoring job {} with unsupported context {}", job.id, context);
                        self.complete(&job, JobOutcome::Ignored).await
                    }
                    UnsupportedAction::Reject => {
                        let err = ShophookError::UnsupportedEvent(context);
                        self.fail(&job, &err, None).await
                    }
                }
            }
            Err(err) if err.is_retryable() => {
                let retry_at = self.config.retry.next_attempt_at(job.attempts, Utc::now());
                self.fail(&job, &err, retry_at).await
            }
            Err(err) => self.fail(&job, &err, None).await,
        };

        self.in_flight.remove(&job.id);
        outcome
    }

    async fn complete(&self, job: &WebhookJob, outcome: JobOutcome) -> JobOutcome {
        match self.jobs.mark_complete(&job.id, &self.owner).await {
            Ok(()) => tracing::debug!("Job {} complete", job.id),
            Err(e) => tracing::error!("Failed to mark job {} complete: {}", job.id, e),
        }
        outcome
    }

    async fn fail(
        &self,
        job: &WebhookJob,
        err: &ShophookError,
        retry_at: Option<chrono::DateTime<Utc>>,
    ) -> JobOutcome {
        let message = err.to_string();

        if let Err(e) = self.jobs.mark_failed(&job.id, &self.owner, &message, retry_at).await {
            tracing::error!("Failed to record failure of job {}: {}", job.id, e);
        }

        match retry_at {
            Some(at) => {
                tracing::warn!(
                    "Job {} failed (attempt {}), retrying at {}: {}",
                    job.id,
                    job.attempts,
                    at,
                    message
                );
                JobOutcome::Retrying
            }
            None => {
                tracing::error!(
                    "Job {} dead-lettered after {} attempts: {}",
                    job.id,
                    job.attempts,
                    message
                );
                JobOutcome::DeadLettered
            }
        }
    }
}

/// Handle for managing the drain worker.
pub struct DrainWorkerHandle {
    /// Handle to the worker task.
    pub task_handle: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl DrainWorkerHandle {
    /// Signals the worker to shut down gracefully and waits for it to finish.
    pub async fn shutdown(self) -> std::result::Result<(), tokio::task::JoinError> {
        let _ = self.shutdown_tx.send(true);
        self.task_handle.await
    }
}

/// Starts the drain worker on its interval.
pub fn start_drain_worker(worker: DrainWorker) -> DrainWorkerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task_handle = tokio::spawn(async move {
        run_drain_worker(worker, shutdown_rx).await;
    });

    DrainWorkerHandle {
        task_handle,
        shutdown_tx,
    }
}

/// Main worker loop.
async fn run_drain_worker(worker: DrainWorker, mut shutdown_rx: watch::Receiver<bool>) {
    tracing::info!(
        "Drain worker {} started (every {:?}, concurrency {})",
        worker.owner(),
        worker.config.interval,
        worker.config.concurrency
    );

    let mut interval = tokio::time::interval(worker.config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Drain worker received shutdown signal");
                    break;
                }
            }
            _ = interval.tick() => {
                match worker.run_cycle(&mut shutdown_rx).await {
                    Ok(report) => {
                        if report.claimed > 0 || report.reclaimed > 0 {
                            tracing::info!(
                                "Drain cycle: {} claimed, {} completed, {} ignored, {} retrying, {} dead-lettered, {} reclaimed",
                                report.claimed,
                                report.completed,
                                report.ignored,
                                report.retrying,
                                report.dead_lettered,
                                report.reclaimed
                            );
                        }
                    }
                    Err(e) => tracing::error!("Drain cycle failed: {}", e),
                }

                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Drain worker stopped");
}
