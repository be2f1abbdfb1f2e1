//! Test utilities for shophook-server integration tests.

use async_trait::async_trait;
use axum::Router;
use secrecy::SecretString;
use shophook_core::crypto::hmac_sha256_base64;
use shophook_core::db::{DbPool, SqliteJobStore, create_pool, run_migrations};
use shophook_core::models::{
    Fulfillment, JobId, JobStats, JobStatus, Order, Refund, RefundOutcome, WebhookJob,
};
use shophook_core::processor::OrderService;
use shophook_core::queue::{RetryPolicy, WebhookJobStore};
use shophook_core::{Result, ShophookError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::middleware::OpsAuthConfig;
use crate::routes;
use crate::state::AppState;
use crate::worker::{DrainConfig, DrainWorker};

/// Ops token used in all tests.
pub const TEST_OPS_TOKEN: &str = "test-ops-token-12345";

/// Shared secret webhooks are signed with in tests.
pub const TEST_SHARED_SECRET: &str = "test-shared-secret";

/// Shop domain sent with test webhooks.
pub const TEST_SHOP_DOMAIN: &str = "example.myshopify.com";

/// Signs a body the way the platform does.
pub fn sign(body: &[u8]) -> String {
    hmac_sha256_base64(TEST_SHARED_SECRET.as_bytes(), body)
}

/// In-memory order service with failure and latency injection.
#[derive(Default)]
pub struct MockOrderService {
    orders: Mutex<HashMap<i64, Order>>,
    refunds: Mutex<HashSet<i64>>,
    fulfillments: Mutex<HashMap<i64, Fulfillment>>,
    attempts: AtomicUsize,
    saves: AtomicUsize,
    failing: AtomicBool,
    panicking: AtomicBool,
    delay_ms: AtomicU64,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockOrderService {
    /// Makes every write fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every write panic.
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    /// Delays every write.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Write calls received, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Orders saved successfully.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Most writes observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn order(&self, id: i64) -> Option<Order> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }

    pub fn fulfillment(&self, id: i64) -> Option<Fulfillment> {
        self.fulfillments.lock().unwrap().get(&id).cloned()
    }

    async fn begin_write(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panicking.load(Ordering::SeqCst) {
            panic!("injected processing panic");
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(ShophookError::Storage("injected storage failure".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl OrderService for MockOrderService {
    async fn save_order(&self, order: &Order) -> Result<()> {
        self.begin_write().await?;

        let mut orders = self.orders.lock().unwrap();
        let refunded = orders.get(&order.id).map(|o| o.refunded).unwrap_or_default();
        orders.insert(
            order.id,
            Order {
                refunded,
                ..order.clone()
            },
        );
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn process_refund(&self, refund: &Refund) -> Result<RefundOutcome> {
        self.begin_write().await?;

        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&refund.order_id)
            .ok_or(ShophookError::OrderNotFound(refund.order_id))?;

        let refunded = order.refunded.checked_add(refund.amount).ok_or_else(|| {
            ShophookError::Validation(format!("refund {}: amount out of range", refund.id))
        })?;

        if !self.refunds.lock().unwrap().insert(refund.id) {
            return Ok(RefundOutcome::AlreadyApplied);
        }

        order.refunded = refunded;
        Ok(RefundOutcome::Applied)
    }

    async fn record_fulfillment(&self, fulfillment: &Fulfillment) -> Result<()> {
        self.begin_write().await?;

        self.fulfillments
            .lock()
            .unwrap()
            .insert(fulfillment.id, fulfillment.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.order(id))
    }
}

/// Job store whose backend is always unavailable.
#[derive(Debug, Default)]
pub struct FailingJobStore;

fn unavailable<T>() -> Result<T> {
    Err(ShophookError::Persist("job store unavailable".to_string()))
}

#[async_trait]
impl WebhookJobStore for FailingJobStore {
    async fn enqueue_from(&self, _context: &str, _source: Option<&str>, _payload: &[u8]) -> Result<JobId> {
        unavailable()
    }

    async fn get(&self, _id: &JobId) -> Result<Option<WebhookJob>> {
        unavailable()
    }

    async fn list_pending(&self, _limit: i64) -> Result<Vec<WebhookJob>> {
        unavailable()
    }

    async fn claim(&self, _id: &JobId, _owner: &str, _lease: Duration) -> Result<Option<WebhookJob>> {
        unavailable()
    }

    async fn mark_complete(&self, _id: &JobId, _owner: &str) -> Result<()> {
        unavailable()
    }

    async fn mark_failed(
        &self,
        _id: &JobId,
        _owner: &str,
        _error: &str,
        _retry_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        unavailable()
    }

    async fn release(&self, _id: &JobId, _owner: &str) -> Result<()> {
        unavailable()
    }

    async fn reclaim_expired(&self, _max_attempts: u32) -> Result<u64> {
        unavailable()
    }

    async fn list(&self, _status: Option<JobStatus>, _limit: i64) -> Result<Vec<WebhookJob>> {
        unavailable()
    }

    async fn list_failed(&self, _limit: i64) -> Result<Vec<WebhookJob>> {
        unavailable()
    }

    async fn requeue(&self, _id: &JobId) -> Result<bool> {
        unavailable()
    }

    async fn stats(&self) -> Result<JobStats> {
        unavailable()
    }
}

/// Handles into the state behind a test app.
pub struct TestContext {
    pub db: DbPool,
    pub jobs: Arc<SqliteJobStore>,
    pub orders: Arc<MockOrderService>,
    pub state: AppState,
}

impl TestContext {
    /// A drain worker over this context's job store with immediate retries.
    pub fn drain_worker(&self, max_attempts: u32) -> DrainWorker {
        let config = DrainConfig {
            interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(50),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            ..DrainConfig::default()
        };

        DrainWorker::new(self.jobs.clone(), self.state.router.clone(), config)
    }
}

/// Creates an in-memory test database with migrations applied.
pub async fn setup_test_db() -> DbPool {
    let pool = create_pool("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Default server configuration for tests.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::new(SecretString::from(TEST_SHARED_SECRET.to_string()));
    config.database_url = "sqlite::memory:".to_string();
    config
}

/// Creates test application state with an in-memory job store and a mock order service.
pub async fn setup_test_state(config: ServerConfig) -> TestContext {
    let db = setup_test_db().await;
    let jobs = Arc::new(SqliteJobStore::new(db.clone()));
    let orders = Arc::new(MockOrderService::default());
    let ops_auth_config = OpsAuthConfig::new(Some(TEST_OPS_TOKEN.to_string()));

    let state = AppState::new(config, jobs.clone(), orders.clone(), ops_auth_config);

    TestContext {
        db,
        jobs,
        orders,
        state,
    }
}

/// Creates a test application with the given configuration.
pub async fn create_test_app_with_config(config: ServerConfig) -> (Router, TestContext) {
    let ctx = setup_test_state(config).await;
    let app = routes::app(ctx.state.clone());
    (app, ctx)
}

/// Creates a test application with the default test configuration.
pub async fn create_test_app_with_state() -> (Router, TestContext) {
    create_test_app_with_config(test_config()).await
}

/// Creates a test application over a custom job store.
pub fn create_test_app_with_job_store(
    config: ServerConfig,
    jobs: Arc<dyn WebhookJobStore>,
) -> (Router, Arc<MockOrderService>) {
    let orders = Arc::new(MockOrderService::default());
    let state = AppState::new(
        config,
        jobs,
        orders.clone(),
        OpsAuthConfig::new(Some(TEST_OPS_TOKEN.to_string())),
    );
    (routes::app(state), orders)
}
