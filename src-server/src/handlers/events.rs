//! Server-Sent Events relay of one job's progress.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use super::ApiError;
use crate::state::AppState;

/// Streams the job's events; the SSE event name is the event type.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let events = tenderpipe::job_events(state.orchestrator.jobs(), &job_id, state.stream)?;
    log::info!("SSE client connected for job {}", job_id);

    let stream = events.filter_map(move |event| {
        let job_id = job_id.clone();
        async move {
            match serde_json::to_string(&event) {
                Ok(json) => Some(Ok::<_, Infallible>(
                    Event::default().event(event.event_type.as_str()).data(json),
                )),
                Err(e) => {
                    log::warn!("SSE serialization error for job {}: {}", job_id, e);
                    None
                }
            }
        }
    });

    Ok(Sse::new(stream).into_response())
}
