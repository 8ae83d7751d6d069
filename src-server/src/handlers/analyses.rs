use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tenderpipe::{AnalysisOptions, DataPool, Submission};

use super::{ApiError, ApiJson, ApiResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub data_pool: DataPool,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub data_pool: DataPool,
}

/// Starts an analysis and answers before it runs.
pub async fn submit(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SubmitRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Submission>>), ApiError> {
    let submission = state
        .orchestrator
        .submit(request.data_pool, &request.options)?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(submission))))
}

pub async fn retry(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
    ApiJson(request): ApiJson<RetryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Submission>>), ApiError> {
    let submission = state.orchestrator.retry(&analysis_id, request.data_pool)?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(submission))))
}
