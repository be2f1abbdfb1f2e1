//! One-shot queue maintenance commands.

use anyhow::{Context, Result, bail};
use shophook_core::db::{DbPool, SqliteJobStore, create_pool, run_migrations};
use shophook_core::models::JobId;
use shophook_core::queue::WebhookJobStore;
use shophook_server::{AppState, DrainWorker, OpsAuthConfig, ServerConfig};

async fn open(database_url: &str) -> Result<DbPool> {
    let db = create_pool(database_url)
        .await
        .context("Failed to open database")?;
    run_migrations(&db).await.context("Failed to run migrations")?;
    Ok(db)
}

/// `shophookd drain`
pub async fn drain(config: ServerConfig) -> Result<()> {
    let db = open(&config.database_url).await?;
    let drain_config = config.drain.clone();
    let state = AppState::with_sqlite(db, config, OpsAuthConfig::default());

    let worker = DrainWorker::new(state.jobs.clone(), state.router.clone(), drain_config);
    let report = worker.run_once().await.context("Drain cycle failed")?;

    println!(
        "claimed {}, completed {}, ignored {}, retrying {}, dead-lettered {}, reclaimed {}",
        report.claimed,
        report.completed,
        report.ignored,
        report.retrying,
        report.dead_lettered,
        report.reclaimed
    );
    Ok(())
}

/// `shophookd failed`
pub async fn failed(database_url: &str, limit: i64) -> Result<()> {
    let jobs = SqliteJobStore::new(open(database_url).await?);
    let failed = jobs.list_failed(limit).await.context("Failed to list jobs")?;

    if failed.is_empty() {
        println!("No dead-lettered jobs");
        return Ok(());
    }

    for job in failed {
        println!(
            "{}  {}  {}  attempts={}  {}",
            job.id,
            job.context,
            job.source.as_deref().unwrap_or("-"),
            job.attempts,
            job.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// `shophookd retry <JOB_ID>`
pub async fn retry(database_url: &str, job_id: &str) -> Result<()> {
    let id = JobId::from_string(job_id).context("Invalid job ID")?;
    let jobs = SqliteJobStore::new(open(database_url).await?);

    if !jobs.requeue(&id).await.context("Failed to requeue job")? {
        bail!("Job {} is not dead-lettered", id);
    }

    println!("Requeued job {}", id);
    Ok(())
}
