use std::time::Duration;

use crate::ai::{ContextualModel, ContextualRequest, KeyBlock, TableSummary};
use crate::health::{GateError, HealthMonitor};
use crate::pipeline::data_pool::DataPool;
use crate::pipeline::error::StageFailure;
use crate::pipeline::results::{ContextualResult, ExtractedFields};

const KEY_BLOCK_KEYWORDS: &[&str] = &[
    "condition",
    "penalty",
    "staff",
    "personnel",
    "equipment",
    "delivery",
    "risk",
];
const MAX_KEY_BLOCKS: usize = 10;
const MAX_BLOCK_CHARS: usize = 300;
const MAX_TABLES: usize = 5;

/// Name under which a model is tracked by the health monitor.
pub fn model_health_name(model: &dyn ContextualModel) -> String {
    format!("model:{}", model.name())
}

pub fn build_request(pool: &DataPool, fields: &ExtractedFields) -> ContextualRequest {
    let key_blocks = pool
        .text_blocks
        .iter()
        .filter(|block| {
            let lower = block.text.to_lowercase();
            KEY_BLOCK_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .take(MAX_KEY_BLOCKS)
        .map(|block| KeyBlock {
            block_id: block.block_id.clone(),
            text: block.text.chars().take(MAX_BLOCK_CHARS).collect(),
        })
        .collect();

    let tables = pool
        .tables
        .iter()
        .take(MAX_TABLES)
        .map(|table| TableSummary {
            table_id: table.table_id.clone(),
            headers: table.headers.clone(),
            row_count: table.rows.len(),
        })
        .collect();

    ContextualRequest {
        fields: fields.clone(),
        key_blocks,
        tables,
    }
}

/// Scores the tender with `model`, gated and recorded by `health`. No
/// retries: any failure is returned to the caller's failure policy.
pub async fn analyze(
    model: &dyn ContextualModel,
    health: &HealthMonitor,
    timeout: Duration,
    pool: &DataPool,
    fields: &ExtractedFields,
) -> Result<ContextualResult, StageFailure> {
    let request = build_request(pool, fields);
    let health_name = model_health_name(model);
    let timeout_ms = timeout.as_millis() as u64;

    let call = async {
        match tokio::time::timeout(timeout, model.analyze(&request)).await {
            Ok(result) => result,
            Err(_) => Err(crate::ai::ModelError::Timeout(timeout_ms)),
        }
    };

    let value = health.call(&health_name, call).await.map_err(|e| match e {
        GateError::Unavailable(name) => {
            StageFailure::external(format!("Model '{}' is unavailable (circuit open)", name))
        }
        GateError::Failed(e) => StageFailure::external(format!("Model call failed: {}", e)),
    })?;

    serde_json::from_value(value)
        .map_err(|e| StageFailure::external(format!("Model output is malformed: {}", e)))
}
