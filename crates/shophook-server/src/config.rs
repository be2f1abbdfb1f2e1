//! Server configuration loaded from the environment.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;

use secrecy::SecretString;
use shophook_core::crypto::DEFAULT_MAX_WEBHOOK_SIZE;
use shophook_core::dispatch::{UnsupportedAction, UnsupportedEventPolicy};
use shophook_core::models::EventKind;
use shophook_core::{Result, ShophookError};

use crate::worker::DrainConfig;

/// Database used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:shophook.db";

/// Reads `DATABASE_URL`, falling back to [`DEFAULT_DATABASE_URL`].
pub fn database_url_from_env() -> String {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

/// How an accepted webhook of a given kind is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Processed during the request.
    Inline,
    /// Persisted and processed by the drain worker.
    Queued,
}

/// What to do when inline processing fails with a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineFailure {
    /// Answer 5xx and let the sender redeliver. Nothing is queued.
    Reject,
    /// Persist the payload for the drain worker and answer 200.
    Queue,
}

impl FromStr for InlineFailure {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(InlineFailure::Reject),
            "queue" => Ok(InlineFailure::Queue),
            _ => Err(format!("expected 'reject' or 'queue', got {:?}", s)),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Database URL.
    pub database_url: String,
    /// Secret the platform signs webhooks with.
    pub shared_secret: SecretString,
    /// Secret being rotated out, still accepted while set.
    pub previous_shared_secret: Option<SecretString>,
    /// Maximum accepted webhook body size in bytes.
    pub max_payload_bytes: usize,
    /// Event kinds persisted for the drain worker instead of processed inline.
    pub queued_kinds: HashSet<EventKind>,
    pub inline_failure: InlineFailure,
    pub unsupported_events: UnsupportedEventPolicy,
    pub drain: DrainConfig,
}

impl ServerConfig {
    /// Creates a configuration with defaults for everything but the secret.
    pub fn new(shared_secret: SecretString) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            shared_secret,
            previous_shared_secret: None,
            max_payload_bytes: DEFAULT_MAX_WEBHOOK_SIZE,
            queued_kinds: HashSet::from([EventKind::FulfillmentCreate]),
            inline_failure: InlineFailure::Reject,
            unsupported_events: UnsupportedEventPolicy::default(),
            drain: DrainConfig::default(),
        }
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let shared_secret = std::env::var("SHOPHOOK_SHARED_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ShophookError::Configuration("SHOPHOOK_SHARED_SECRET must be set".to_string())
            })?;

        let mut config = Self::new(SecretString::from(shared_secret));

        config.bind_addr = env_or("SHOPHOOK_BIND_ADDR", config.bind_addr)?;
        config.database_url = database_url_from_env();
        config.previous_shared_secret = std::env::var("SHOPHOOK_PREVIOUS_SHARED_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        config.max_payload_bytes = env_or("SHOPHOOK_MAX_PAYLOAD_BYTES", config.max_payload_bytes)?;

        if let Ok(kinds) = std::env::var("SHOPHOOK_QUEUED_KINDS") {
            config.queued_kinds = split_list(&kinds)
                .map(|k| {
                    k.parse::<EventKind>().map_err(|e| {
                        ShophookError::Configuration(format!("SHOPHOOK_QUEUED_KINDS: {}", e))
                    })
                })
                .collect::<Result<_>>()?;
        }

        config.inline_failure = env_or("SHOPHOOK_INLINE_FAILURE", config.inline_failure)?;

        let default_action = env_or("SHOPHOOK_UNSUPPORTED_EVENTS", UnsupportedAction::Ignore)?;
        let mut policy = UnsupportedEventPolicy::new(default_action);
        for topic in split_list(&std::env::var("SHOPHOOK_IGNORED_TOPICS").unwrap_or_default()) {
            policy = policy.with_override(topic, UnsupportedAction::Ignore);
        }
        for topic in split_list(&std::env::var("SHOPHOOK_REJECTED_TOPICS").unwrap_or_default()) {
            policy = policy.with_override(topic, UnsupportedAction::Reject);
        }
        config.unsupported_events = policy;

        config.drain = DrainConfig::from_env()?;

        if config.max_payload_bytes == 0 {
            return Err(ShophookError::Configuration(
                "SHOPHOOK_MAX_PAYLOAD_BYTES must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn delivery_mode(&self, kind: EventKind) -> DeliveryMode {
        if self.queued_kinds.contains(&kind) {
            DeliveryMode::Queued
        } else {
            DeliveryMode::Inline
        }
    }
}

/// Reads and parses an environment variable, falling back to `default` when unset.
pub(crate) fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ShophookError::Configuration(format!("Invalid {}: {}", name, e))),
        _ => Ok(default),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
