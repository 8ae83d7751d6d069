//! Job lifecycle: records, persistence and the manager that owns them.

pub mod manager;
pub mod model;
pub mod progress;
pub mod store;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::ErrorKind;

pub use manager::JobManager;
pub use model::{Job, JobStatus};
pub use progress::{JobContext, NoopProgress, ProgressReporter};
pub use store::{InMemoryJobStore, JobCounts, JobList, JobQuery, JobStore, SqliteJobStore};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} is {status} and cannot be cancelled")]
    NotCancellable { job_id: String, status: JobStatus },

    #[error("Job {job_id} is {status} and cannot be deleted")]
    NotDeletable { job_id: String, status: JobStatus },

    #[error("Failed to persist job {job_id}: {source}")]
    Persistence {
        job_id: String,
        #[source]
        source: DatabaseError,
    },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::NotFound(_) => ErrorKind::NotFound,
            JobError::InvalidTransition { .. }
            | JobError::NotCancellable { .. }
            | JobError::NotDeletable { .. } => ErrorKind::ValidationError,
            JobError::Persistence { .. } => ErrorKind::PersistenceError,
        }
    }
}

/// Classified failure returned by a pipeline function.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Job cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}
