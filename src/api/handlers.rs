use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use super::{error::ApiError, AppState};
use crate::models::{BenchmarkRequest, Job, JobId, JobStatus, JobSummary};

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub cancel_requested: bool,
    /// Status at the time of the request; the job stops asynchronously
    pub status: JobStatus,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn start_benchmark(
    State(state): State<AppState>,
    payload: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let job_id = state.scheduler.start(&request)?;
    Ok(Json(StartResponse { job_id }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_job_id(&raw_id)?;
    Ok(Json(state.scheduler.status(&id)?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = parse_job_id(&raw_id)?;
    state.scheduler.cancel(&id)?;
    let job = state.scheduler.status(&id)?;
    Ok(Json(CancelResponse {
        job_id: id,
        cancel_requested: job.cancel_requested,
        status: job.status,
    }))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.scheduler.list())
}

/// A string that is not a job id can never name a known job
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Job not found: {}", raw)))
}
