//! Webhook job inspection and manual retry.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use shophook_core::models::{JobId, JobStatus, WebhookJobResponse};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// List webhook jobs, newest first.
///
/// GET /api/jobs?status=failed&limit=50
///
/// `status=dead` lists only dead-lettered jobs.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<WebhookJobResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let jobs = match query.status.as_deref() {
        None => state.jobs.list(None, limit).await?,
        Some("dead") => state.jobs.list_failed(limit).await?,
        Some(status) => {
            let status: JobStatus = status.parse().map_err(ApiError::bad_request)?;
            state.jobs.list(Some(status), limit).await?
        }
    };

    Ok(Json(jobs.into_iter().map(WebhookJobResponse::from).collect()))
}

/// Job counts per status.
///
/// GET /api/jobs/stats
pub async fn job_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.jobs.stats().await?;
    Ok(Json(json!(stats)))
}

/// Get a webhook job by ID.
///
/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WebhookJobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;

    match state.jobs.get(&job_id).await? {
        Some(job) => Ok(Json(WebhookJobResponse::from(job))),
        None => Err(ApiError::not_found("Job not found")),
    }
}

/// Put a dead-lettered job back in the queue.
///
/// POST /api/jobs/{id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let job_id = parse_job_id(&id)?;

    if state.jobs.requeue(&job_id).await? {
        tracing::info!("Requeued dead-lettered job {}", job_id);
        Ok((
            StatusCode::OK,
            Json(json!({"status": "requeued", "job_id": job_id.to_string()})),
        ))
    } else {
        Err(ApiError::new(
            StatusCode::CONFLICT,
            "Only dead-lettered jobs can be retried",
        ))
    }
}

fn parse_job_id(id: &str) -> Result<JobId, ApiError> {
    JobId::from_string(id).map_err(|_| ApiError::bad_request("Invalid job ID"))
}
