use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::ModelError;
use crate::db::DatabaseError;
use crate::jobs::JobError;
use crate::market::SourceError;
use crate::pipeline::OrchestratorError;

/// Classification of every failure that can reach a job, a stage result
/// or a remote caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    FatalStageError,
    PartialStageError,
    PersistenceError,
    ExternalSourceError,
    Cancelled,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::FatalStageError => "fatal_stage_error",
            ErrorKind::PartialStageError => "partial_stage_error",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::ExternalSourceError => "external_source_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotFound => "not_found",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation_error" => Some(ErrorKind::ValidationError),
            "fatal_stage_error" => Some(ErrorKind::FatalStageError),
            "partial_stage_error" => Some(ErrorKind::PartialStageError),
            "persistence_error" => Some(ErrorKind::PersistenceError),
            "external_source_error" => Some(ErrorKind::ExternalSourceError),
            "cancelled" => Some(ErrorKind::Cancelled),
            "not_found" => Some(ErrorKind::NotFound),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum TenderpipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Price source error: {0}")]
    Source(#[from] SourceError),
}

impl TenderpipeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TenderpipeError::Config(_) => ErrorKind::ValidationError,
            TenderpipeError::Database(_) => ErrorKind::PersistenceError,
            TenderpipeError::Job(e) => e.kind(),
            TenderpipeError::Orchestrator(e) => e.kind(),
            TenderpipeError::Model(e) => e.kind(),
            TenderpipeError::Source(e) => e.kind(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid price source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TenderpipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_round_trips_through_str() {
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::FatalStageError,
            ErrorKind::PartialStageError,
            ErrorKind::PersistenceError,
            ErrorKind::ExternalSourceError,
            ErrorKind::Cancelled,
            ErrorKind::NotFound,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("bogus"), None);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PersistenceError).unwrap();
        assert_eq!(json, "\"persistence_error\"");
    }

    #[test]
    fn test_umbrella_kind() {
        let err: TenderpipeError = DatabaseError::LockPoisoned.into();
        assert_eq!(err.kind(), ErrorKind::PersistenceError);
    }
}
