//! Application state for the Shophook server.

use shophook_core::db::{DbPool, SqliteJobStore, SqliteOrderStore};
use shophook_core::dispatch::DispatchRouter;
use shophook_core::processor::OrderService;
use shophook_core::queue::WebhookJobStore;
use shophook_core::webhook::ShopifyVerifier;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::middleware::OpsAuthConfig;

/// Shared application state.
///
/// Built once at startup and cloned into every handler and worker.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Durable webhook job queue.
    pub jobs: Arc<dyn WebhookJobStore>,
    /// Downstream order service.
    pub orders: Arc<dyn OrderService>,
    /// Routes payloads to the order service.
    pub router: Arc<DispatchRouter>,
    /// Webhook signature verifier.
    pub verifier: Arc<ShopifyVerifier>,
    /// Ops endpoint authentication.
    pub ops_auth_config: Arc<OpsAuthConfig>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        config: ServerConfig,
        jobs: Arc<dyn WebhookJobStore>,
        orders: Arc<dyn OrderService>,
        ops_auth_config: OpsAuthConfig,
    ) -> Self {
        let verifier = ShopifyVerifier::new(config.shared_secret.clone())
            .with_previous_secret(config.previous_shared_secret.clone());
        let router = DispatchRouter::new(orders.clone(), config.unsupported_events.clone());

        Self {
            config: Arc::new(config),
            jobs,
            orders,
            router: Arc::new(router),
            verifier: Arc::new(verifier),
            ops_auth_config: Arc::new(ops_auth_config),
        }
    }

    /// Creates state backed by the SQLite job and order stores.
    pub fn with_sqlite(db: DbPool, config: ServerConfig, ops_auth_config: OpsAuthConfig) -> Self {
        Self::new(
            config,
            Arc::new(SqliteJobStore::new(db.clone())),
            Arc::new(SqliteOrderStore::new(db)),
            ops_auth_config,
        )
    }
}
