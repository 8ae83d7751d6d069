//! Contextual scoring model seam.
//!
//! The pipeline treats a model as an opaque async call that returns JSON or
//! fails. [`HeuristicModel`] runs in-process; [`HttpModel`] posts the request
//! to a remote endpoint.

mod heuristic;
mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::error::ErrorKind;
use crate::pipeline::results::ExtractedFields;

pub use heuristic::HeuristicModel;
pub use http::HttpModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyBlock {
    pub block_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_id: String,
    pub headers: Vec<String>,
    pub row_count: usize,
}

/// What the model gets to see of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualRequest {
    pub fields: ExtractedFields,
    pub key_blocks: Vec<KeyBlock>,
    pub tables: Vec<TableSummary>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model endpoint returned status {0}")]
    UnexpectedStatus(u16),

    #[error("Model output is malformed: {0}")]
    Malformed(String),

    #[error("Model timed out after {0} ms")]
    Timeout(u64),
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalSourceError
    }
}

#[async_trait]
pub trait ContextualModel: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: &ContextualRequest) -> Result<Value, ModelError>;
}

/// The configured model: remote when an endpoint is set, the built-in
/// heuristics otherwise.
pub fn build_model(config: &ModelConfig, timeout: Duration) -> Result<Arc<dyn ContextualModel>, ModelError> {
    match config.endpoint {
        Some(ref endpoint) => Ok(Arc::new(HttpModel::new(config.name.as_str(), endpoint, timeout)?)),
        None => Ok(Arc::new(HeuristicModel::new())),
    }
}
