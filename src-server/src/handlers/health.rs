use axum::extract::{Path, State};
use axum::Json;
use tenderpipe::{HealthReport, SystemHealth};

use super::{ApiError, ApiResponse, ApiResult};
use crate::state::AppState;

pub async fn system_health(State(state): State<AppState>) -> ApiResult<SystemHealth> {
    Ok(Json(ApiResponse::ok(state.orchestrator.health().system_health())))
}

pub async fn scraper_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<HealthReport> {
    let report = state
        .orchestrator
        .health()
        .get_health(&name)
        .ok_or_else(|| ApiError::not_found(format!("No health record for '{}'", name)))?;
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn reset_all(State(state): State<AppState>) -> ApiResult<SystemHealth> {
    let health = state.orchestrator.health();
    health.reset_all();
    Ok(Json(ApiResponse::ok(health.system_health())))
}

pub async fn reset_scraper(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<String> {
    if !state.orchestrator.health().reset(&name) {
        return Err(ApiError::not_found(format!("No health record for '{}'", name)));
    }
    Ok(Json(ApiResponse::ok(name)))
}
