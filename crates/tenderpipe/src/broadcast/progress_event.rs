//! Progress events pushed to job subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::jobs::{Job, JobStatus};

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Full job state, sent first to every new subscriber.
    Snapshot,
    Progress,
    Error,
    Success,
    Info,
    Ping,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Snapshot => "snapshot",
            EventType::Progress => "progress",
            EventType::Error => "error",
            EventType::Success => "success",
            EventType::Info => "info",
            EventType::Ping => "ping",
        }
    }
}

/// Ephemeral event for one job. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub job_id: String,
    /// Job status at publish time. Absent on keep-alives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Creates an event of `event_type` carrying the job's current status,
    /// stage and progress.
    pub fn for_job(event_type: EventType, job: &Job) -> Self {
        Self {
            event_type,
            job_id: job.id.clone(),
            status: Some(job.status),
            stage: job.current_stage.clone(),
            progress: Some(job.progress),
            message: None,
            details: None,
            code: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Full snapshot of the job in `data`.
    pub fn snapshot(job: &Job) -> Self {
        let mut event = Self::for_job(EventType::Snapshot, job);
        event.data = serde_json::to_value(job).ok();
        event.message = job.error.clone();
        event.code = job.error_kind;
        event
    }

    pub fn ping(job_id: &str) -> Self {
        Self {
            event_type: EventType::Ping,
            job_id: job_id.to_string(),
            status: None,
            stage: None,
            progress: None,
            message: None,
            details: None,
            code: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Option<Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_code(mut self, code: ErrorKind) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True when the event reports a terminal job status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_carries_job() {
        let mut job = Job::new("j1", json!({}));
        job.transition(JobStatus::Running).unwrap();
        job.advance(25);
        job.current_stage = Some("extraction".to_string());

        let event = ProgressEvent::snapshot(&job);
        assert_eq!(event.event_type, EventType::Snapshot);
        assert_eq!(event.status, Some(JobStatus::Running));
        assert_eq!(event.progress, Some(25));
        assert_eq!(event.data.as_ref().unwrap()["id"], "j1");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_serialized_shape() {
        let job = Job::new("j1", json!({}));
        let event = ProgressEvent::for_job(EventType::Error, &job)
            .with_code(ErrorKind::FatalStageError)
            .with_message("boom");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["jobId"], "j1");
        assert_eq!(value["code"], "fatal_stage_error");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_ping_is_not_terminal() {
        let ping = ProgressEvent::ping("j1");
        assert_eq!(ping.event_type, EventType::Ping);
        assert!(ping.status.is_none());
        assert!(!ping.is_terminal());
    }
}
