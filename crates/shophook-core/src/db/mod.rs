//! Database module for the webhook pipeline.

pub mod jobs;
pub mod orders;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::{Result, ShophookError};

pub use jobs::SqliteJobStore;
pub use orders::SqliteOrderStore;

/// Database connection pool.
pub type DbPool = SqlitePool;

/// Creates and initializes the database connection pool.
pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| ShophookError::Configuration(format!("Invalid database URL: {}", e)))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    // In-memory databases live only as long as their connections, and
    // shared-cache writers lock whole tables.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Runs database migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Formats a timestamp for storage.
///
/// Fixed-width UTC so that string comparison in SQL orders by time.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ShophookError::DateParse {
            field,
            message: e.to_string(),
        })
}

pub(crate) fn parse_opt_ts(field: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(field, &v)).transpose()
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = create_pool("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let c = a + chrono::Duration::seconds(1);

        assert!(format_ts(&a) < format_ts(&b));
        assert!(format_ts(&b) < format_ts(&c));
        assert_eq!(format_ts(&a).len(), format_ts(&c).len());
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts("test", &format_ts(&now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
