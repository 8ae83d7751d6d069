use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::ErrorKind;
use crate::jobs::{JobError, JobFailure};

use super::data_pool::DataPoolError;

/// Errors returned synchronously by the orchestrator's public operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid data pool: {0}")]
    InvalidPool(#[from] DataPoolError),

    #[error("Invalid analysis options: {0}")]
    InvalidOptions(String),

    #[error("Analysis not found: {0}")]
    AnalysisNotFound(String),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Stage result store error: {0}")]
    Store(#[from] DatabaseError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidPool(_) | OrchestratorError::InvalidOptions(_) => {
                ErrorKind::ValidationError
            }
            OrchestratorError::AnalysisNotFound(_) | OrchestratorError::UnknownStage(_) => {
                ErrorKind::NotFound
            }
            OrchestratorError::Job(e) => e.kind(),
            OrchestratorError::Store(_) => ErrorKind::PersistenceError,
        }
    }
}

/// Why a single stage did not produce its output. The failure policy
/// decides whether this aborts the analysis.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalStageError, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalSourceError, message)
    }
}

impl From<StageFailure> for JobFailure {
    fn from(failure: StageFailure) -> Self {
        JobFailure::new(failure.kind, failure.message)
    }
}
