use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tenderpipe::jobs::{JobCounts, JobList};
use tenderpipe::{Job, JobQuery, JobStatus};

use super::{ApiError, ApiQuery, ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobListing {
    #[serde(flatten)]
    pub list: JobList,
    pub counts: JobCounts,
}

#[derive(Debug, Serialize)]
pub struct CancelOutcome {
    pub job_id: String,
    pub status: JobStatus,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<JobQuery>,
) -> ApiResult<JobListing> {
    let jobs = state.orchestrator.jobs();
    let list = jobs.list_jobs(&query)?;
    let counts = jobs.stats()?;
    Ok(Json(ApiResponse::ok(JobListing { list, counts })))
}

pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Job> {
    let job = state
        .orchestrator
        .jobs()
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::not_found(format!("Job not found: {}", job_id)))?;
    Ok(Json(ApiResponse::ok(job)))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<String> {
    state.orchestrator.jobs().delete_job(&job_id)?;
    Ok(Json(ApiResponse::ok(job_id)))
}

/// Requests cancellation; the job stops at its next stage boundary.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<CancelOutcome>>), ApiError> {
    let status = state.orchestrator.jobs().cancel_job(&job_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(CancelOutcome { job_id, status })),
    ))
}
