//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub progress: u8,
    pub current_stage: Option<String>,
    pub payload: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub cancel_requested: bool,
    pub warnings: String,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            current_stage: row.get("current_stage")?,
            payload: row.get("payload")?,
            result: row.get("result")?,
            error: row.get("error")?,
            error_kind: row.get("error_kind")?,
            cancel_requested: row.get("cancel_requested")?,
            warnings: row.get("warnings")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, status, progress, current_stage, payload, result, error,
             error_kind, cancel_requested, warnings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.status,
                job.progress,
                job.current_stage,
                job.payload,
                job.result,
                job.error,
                job.error_kind,
                job.cancel_requested,
                job.warnings,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing job row. All fields except `id`, `payload` and
/// `created_at` are overwritten. Returns false when no row matched.
pub fn update(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status=?2, progress=?3, current_stage=?4, result=?5, error=?6,
             error_kind=?7, cancel_requested=?8, warnings=?9, updated_at=?10
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.progress,
                job.current_stage,
                job.result,
                job.error,
                job.error_kind,
                job.cancel_requested,
                job.warnings,
                job.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Deletes a job row. Returns false when no row matched.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let (where_clause, status) = match filter.status {
            Some(ref status) => ("WHERE status = ?1", Some(status.clone())),
            None => ("", None),
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let total: u64 = match status {
            Some(ref s) => conn.query_row(&count_sql, params![s], |r| r.get(0))?,
            None => conn.query_row(&count_sql, [], |r| r.get(0))?,
        };

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        let rows = match status {
            Some(ref s) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt
                    .query_map(params![s, limit, offset], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")?;
                let rows = stmt
                    .query_map(params![limit, offset], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok((rows, total))
    })
}

/// Returns (status, count) pairs for every status present in the table.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let counts = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}
