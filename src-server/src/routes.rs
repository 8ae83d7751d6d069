//! HTTP route table.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{analyses, events, health, jobs, stages};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Analyses
        .route("/analyses", post(analyses::submit))
        .route("/analyses/{analysis_id}/retry", post(analyses::retry))
        .route("/analyses/{analysis_id}/stages", get(stages::list_stages))
        .route("/analyses/{analysis_id}/stages/{stage}", get(stages::get_stage))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{job_id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{job_id}/events", get(events::job_events))
        // Scraper health
        .route("/health/scrapers", get(health::system_health))
        .route("/health/scrapers/reset", post(health::reset_all))
        .route("/health/scrapers/{name}", get(health::scraper_health))
        .route("/health/scrapers/{name}/reset", post(health::reset_scraper))
        .with_state(state);

    Router::new().nest("/api", api)
}
