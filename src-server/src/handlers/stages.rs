use axum::extract::{Path, State};
use axum::Json;
use tenderpipe::StageResult;

use super::{ApiError, ApiResponse, ApiResult};
use crate::state::AppState;

pub async fn list_stages(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Vec<StageResult>> {
    let results = state.orchestrator.stage_results(&analysis_id)?;
    Ok(Json(ApiResponse::ok(results)))
}

pub async fn get_stage(
    State(state): State<AppState>,
    Path((analysis_id, stage)): Path<(String, String)>,
) -> ApiResult<StageResult> {
    let result = state
        .orchestrator
        .stage_result(&analysis_id, &stage)?
        .ok_or_else(|| {
            ApiError::not_found(format!("No {} result for analysis {}", stage, analysis_id))
        })?;
    Ok(Json(ApiResponse::ok(result)))
}
