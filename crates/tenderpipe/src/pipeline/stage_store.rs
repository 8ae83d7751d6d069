//! Per-stage result persistence, one current record per
//! `(analysis_id, stage)`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{stage_repo, Database, DatabaseError};
use crate::error::ErrorKind;

use super::AnalysisStage;

/// Error marker on a stage that did not complete normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub analysis_id: String,
    pub stage: AnalysisStage,
    pub result_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    pub created_at: DateTime<Utc>,
}

impl StageResult {
    pub fn completed(analysis_id: &str, stage: AnalysisStage, result_data: Value) -> Self {
        Self {
            analysis_id: analysis_id.to_string(),
            stage,
            result_data,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        analysis_id: &str,
        stage: AnalysisStage,
        result_data: Value,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(StageError {
                kind,
                message: message.into(),
            }),
            ..Self::completed(analysis_id, stage, result_data)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub trait StageResultStore: Send + Sync {
    /// Writes the result, replacing any current one for the same
    /// `(analysis_id, stage)`.
    fn upsert(&self, result: &StageResult) -> Result<(), DatabaseError>;

    fn get(&self, analysis_id: &str, stage: AnalysisStage) -> Result<Option<StageResult>, DatabaseError>;

    /// Every current result of an analysis, in pipeline order.
    fn list(&self, analysis_id: &str) -> Result<Vec<StageResult>, DatabaseError>;
}

// ─── SQLite ─────────────────────────────────────────────────────────────────

pub struct SqliteStageResultStore {
    db: Database,
}

impl SqliteStageResultStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn from_row(row: stage_repo::StageRow) -> Result<Option<StageResult>, DatabaseError> {
        let Some(stage) = AnalysisStage::parse(&row.stage) else {
            log::warn!(
                "Skipping stored result with unknown stage '{}' for analysis {}",
                row.stage,
                row.analysis_id
            );
            return Ok(None);
        };
        let result_data = serde_json::from_str(&row.result_data).map_err(|source| DatabaseError::Json {
            column: "result_data",
            source,
        })?;
        let error = match (row.error_kind, row.error_message) {
            (Some(kind), message) => Some(StageError {
                kind: ErrorKind::parse(&kind).unwrap_or(ErrorKind::PartialStageError),
                message: message.unwrap_or_default(),
            }),
            (None, _) => None,
        };
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(StageResult {
            analysis_id: row.analysis_id,
            stage,
            result_data,
            error,
            created_at,
        }))
    }
}

impl StageResultStore for SqliteStageResultStore {
    fn upsert(&self, result: &StageResult) -> Result<(), DatabaseError> {
        let row = stage_repo::StageRow {
            id: format!("{}_{}", result.analysis_id, result.stage.as_str()),
            analysis_id: result.analysis_id.clone(),
            stage: result.stage.as_str().to_string(),
            result_data: serde_json::to_string(&result.result_data).map_err(|source| {
                DatabaseError::Json {
                    column: "result_data",
                    source,
                }
            })?,
            error_kind: result.error.as_ref().map(|e| e.kind.as_str().to_string()),
            error_message: result.error.as_ref().map(|e| e.message.clone()),
            created_at: result.created_at.to_rfc3339(),
        };
        stage_repo::upsert(&self.db, &row)
    }

    fn get(&self, analysis_id: &str, stage: AnalysisStage) -> Result<Option<StageResult>, DatabaseError> {
        match stage_repo::find(&self.db, analysis_id, stage.as_str())? {
            Some(row) => Self::from_row(row),
            None => Ok(None),
        }
    }

    fn list(&self, analysis_id: &str) -> Result<Vec<StageResult>, DatabaseError> {
        let mut results = Vec::new();
        for row in stage_repo::list_for_analysis(&self.db, analysis_id)? {
            if let Some(result) = Self::from_row(row)? {
                results.push(result);
            }
        }
        results.sort_by_key(|r| r.stage.order());
        Ok(results)
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryStageResultStore {
    results: Mutex<HashMap<(String, AnalysisStage), StageResult>>,
}

impl InMemoryStageResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, AnalysisStage), StageResult>> {
        match self.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Stage result store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl StageResultStore for InMemoryStageResultStore {
    fn upsert(&self, result: &StageResult) -> Result<(), DatabaseError> {
        self.lock()
            .insert((result.analysis_id.clone(), result.stage), result.clone());
        Ok(())
    }

    fn get(&self, analysis_id: &str, stage: AnalysisStage) -> Result<Option<StageResult>, DatabaseError> {
        Ok(self.lock().get(&(analysis_id.to_string(), stage)).cloned())
    }

    fn list(&self, analysis_id: &str) -> Result<Vec<StageResult>, DatabaseError> {
        let mut results: Vec<StageResult> = self
            .lock()
            .values()
            .filter(|r| r.analysis_id == analysis_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.stage.order());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stores() -> Vec<(&'static str, Box<dyn StageResultStore>)> {
        let db = Database::open_in_memory().unwrap();
        vec![
            ("sqlite", Box::new(SqliteStageResultStore::new(db))),
            ("memory", Box::new(InMemoryStageResultStore::new())),
        ]
    }

    #[test]
    fn test_second_write_replaces_first() {
        for (name, store) in stores() {
            store
                .upsert(&StageResult::completed("a1", AnalysisStage::Market, json!({"v": 1})))
                .unwrap();
            store
                .upsert(&StageResult::completed("a1", AnalysisStage::Market, json!({"v": 2})))
                .unwrap();

            let all = store.list("a1").unwrap();
            assert_eq!(all.len(), 1, "{}", name);
            assert_eq!(all[0].result_data, json!({"v": 2}), "{}", name);
        }
    }

    #[test]
    fn test_error_marker_round_trip() {
        for (name, store) in stores() {
            store
                .upsert(&StageResult::failed(
                    "a1",
                    AnalysisStage::Contextual,
                    json!({}),
                    ErrorKind::PartialStageError,
                    "model unavailable",
                ))
                .unwrap();

            let stored = store.get("a1", AnalysisStage::Contextual).unwrap().unwrap();
            assert!(!stored.is_ok(), "{}", name);
            let error = stored.error.unwrap();
            assert_eq!(error.kind, ErrorKind::PartialStageError, "{}", name);
            assert_eq!(error.message, "model unavailable", "{}", name);
        }
    }

    #[test]
    fn test_list_is_in_pipeline_order_and_scoped() {
        for (name, store) in stores() {
            for stage in [
                AnalysisStage::Decision,
                AnalysisStage::Extraction,
                AnalysisStage::Market,
            ] {
                store
                    .upsert(&StageResult::completed("a1", stage, json!(null)))
                    .unwrap();
            }
            store
                .upsert(&StageResult::completed("a2", AnalysisStage::Market, json!(null)))
                .unwrap();

            let stages: Vec<AnalysisStage> =
                store.list("a1").unwrap().into_iter().map(|r| r.stage).collect();
            assert_eq!(
                stages,
                vec![
                    AnalysisStage::Extraction,
                    AnalysisStage::Market,
                    AnalysisStage::Decision
                ],
                "{}",
                name
            );
            assert!(store.get("a3", AnalysisStage::Market).unwrap().is_none(), "{}", name);
        }
    }
}
