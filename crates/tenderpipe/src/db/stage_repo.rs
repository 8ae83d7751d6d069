//! Stage result repository for the `analysis_results` table.
//!
//! One current row per `(analysis_id, stage)`; writes are upserts.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw stage result row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRow {
    pub id: String,
    pub analysis_id: String,
    pub stage: String,
    pub result_data: String,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl StageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            analysis_id: row.get("analysis_id")?,
            stage: row.get("stage")?,
            result_data: row.get("result_data")?,
            error_kind: row.get("error_kind")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts the row, or replaces the data of the existing row with the
/// same `(analysis_id, stage)`. The original row id is kept.
pub fn upsert(db: &Database, row: &StageRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO analysis_results
                (id, analysis_id, stage, result_data, error_kind, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(analysis_id, stage) DO UPDATE SET
                result_data = excluded.result_data,
                error_kind = excluded.error_kind,
                error_message = excluded.error_message,
                created_at = excluded.created_at",
            params![
                row.id,
                row.analysis_id,
                row.stage,
                row.result_data,
                row.error_kind,
                row.error_message,
                row.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds the current row for one stage of an analysis.
pub fn find(db: &Database, analysis_id: &str, stage: &str) -> Result<Option<StageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM analysis_results WHERE analysis_id = ?1 AND stage = ?2",
                params![analysis_id, stage],
                StageRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists every stage row of an analysis, oldest first.
pub fn list_for_analysis(db: &Database, analysis_id: &str) -> Result<Vec<StageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_results WHERE analysis_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![analysis_id], StageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
