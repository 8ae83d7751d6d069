//! Job persistence.
//!
//! `JobStore` is the row-store seam the Job Manager writes through. The
//! SQLite implementation maps jobs onto the `jobs` table; the in-memory
//! implementation backs tests and `:memory:` deployments.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{Database, DatabaseError};
use crate::error::ErrorKind;

use super::model::{Job, JobStatus};

// ─── Query types ────────────────────────────────────────────────────────────

/// Filter and page for job listing.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One page of jobs, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobList {
    pub jobs: Vec<Job>,
    pub total: u64,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl JobCounts {
    fn add(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Queued => self.queued += n,
            JobStatus::Running => self.running += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.queued + self.running + self.completed + self.failed + self.cancelled
    }
}

// ─── Trait ──────────────────────────────────────────────────────────────────

/// Keyed storage of job records. Every call is atomic for its one job.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<(), DatabaseError>;
    /// Overwrites an existing job. Errors if the job was never inserted.
    fn update(&self, job: &Job) -> Result<(), DatabaseError>;
    fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError>;
    fn list(&self, query: &JobQuery) -> Result<JobList, DatabaseError>;
    fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
    fn counts(&self) -> Result<JobCounts, DatabaseError>;
}

// ─── SQLite ─────────────────────────────────────────────────────────────────

pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn parse_status(s: &str, job_id: &str) -> JobStatus {
    JobStatus::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown job status '{}' for job {}, treating as failed",
            s,
            job_id
        );
        JobStatus::Failed
    })
}

fn to_row(job: &Job) -> Result<JobRow, DatabaseError> {
    let json = |column: &'static str, value: &serde_json::Value| {
        serde_json::to_string(value).map_err(|source| DatabaseError::Json { column, source })
    };
    Ok(JobRow {
        id: job.id.clone(),
        status: job.status.as_str().to_string(),
        progress: job.progress,
        current_stage: job.current_stage.clone(),
        payload: json("payload", &job.payload)?,
        result: job.result.as_ref().map(|r| json("result", r)).transpose()?,
        error: job.error.clone(),
        error_kind: job.error_kind.map(|k| k.as_str().to_string()),
        cancel_requested: job.cancel_requested,
        warnings: serde_json::to_string(&job.warnings).map_err(|source| DatabaseError::Json {
            column: "warnings",
            source,
        })?,
        created_at: job.created_at.to_rfc3339(),
        updated_at: job.updated_at.to_rfc3339(),
    })
}

fn from_row(row: JobRow) -> Result<Job, DatabaseError> {
    let payload = serde_json::from_str(&row.payload).map_err(|source| DatabaseError::Json {
        column: "payload",
        source,
    })?;
    let result = row
        .result
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|source| DatabaseError::Json {
            column: "result",
            source,
        })?;
    let warnings = serde_json::from_str(&row.warnings).unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable warnings for job {}: {}", row.id, e);
        Vec::new()
    });

    Ok(Job {
        status: parse_status(&row.status, &row.id),
        progress: row.progress.min(100),
        current_stage: row.current_stage,
        payload,
        result,
        error: row.error,
        error_kind: row.error_kind.as_deref().and_then(ErrorKind::parse),
        cancel_requested: row.cancel_requested,
        warnings,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        id: row.id,
    })
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::insert(&self.db, &to_row(job)?)
    }

    fn update(&self, job: &Job) -> Result<(), DatabaseError> {
        if job_repo::update(&self.db, &to_row(job)?)? {
            Ok(())
        } else {
            Err(DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        }
    }

    fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?.map(from_row).transpose()
    }

    fn list(&self, query: &JobQuery) -> Result<JobList, DatabaseError> {
        let filter = JobFilter {
            status: query.status.map(|s| s.as_str().to_string()),
            limit: query.limit,
            offset: query.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        let jobs = rows.into_iter().map(from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(JobList { jobs, total })
    }

    fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::delete(&self.db, id)
    }

    fn counts(&self) -> Result<JobCounts, DatabaseError> {
        let mut counts = JobCounts::default();
        for (status, n) in job_repo::count_by_status(&self.db)? {
            counts.add(parse_status(&status, "<aggregate>"), n);
        }
        Ok(counts)
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: &Job) -> Result<(), DatabaseError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(DatabaseError::Unavailable(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn update(&self, job: &Job) -> Result<(), DatabaseError> {
        match self.write().get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        Ok(self.read().get(id).cloned())
    }

    fn list(&self, query: &JobQuery) -> Result<JobList, DatabaseError> {
        let mut jobs: Vec<Job> = self
            .read()
            .values()
            .filter(|j| query.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = jobs.len() as u64;
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.unwrap_or(100) as usize;
        let jobs = jobs.into_iter().skip(offset).take(limit).collect();
        Ok(JobList { jobs, total })
    }

    fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        Ok(self.write().remove(id).is_some())
    }

    fn counts(&self) -> Result<JobCounts, DatabaseError> {
        let mut counts = JobCounts::default();
        for job in self.read().values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stores() -> Vec<Box<dyn JobStore>> {
        vec![
            Box::new(InMemoryJobStore::new()),
            Box::new(SqliteJobStore::new(Database::open_in_memory().unwrap())),
        ]
    }

    #[test]
    fn test_insert_get_update() {
        for store in stores() {
            let mut job = Job::new("j1", json!({"documents": 2}));
            store.insert(&job).unwrap();

            job.transition(JobStatus::Running).unwrap();
            job.advance(50);
            job.current_stage = Some("contextual".to_string());
            job.warnings.push("market degraded".to_string());
            store.update(&job).unwrap();

            let loaded = store.get("j1").unwrap().unwrap();
            assert_eq!(loaded.status, JobStatus::Running);
            assert_eq!(loaded.progress, 50);
            assert_eq!(loaded.payload, json!({"documents": 2}));
            assert_eq!(loaded.warnings, vec!["market degraded".to_string()]);
            assert!(store.get("missing").unwrap().is_none());
        }
    }

    #[test]
    fn test_update_unknown_job_fails() {
        for store in stores() {
            let job = Job::new("ghost", json!(null));
            assert!(store.update(&job).is_err());
        }
    }

    #[test]
    fn test_failed_job_round_trips_error_kind() {
        for store in stores() {
            let mut job = Job::new("j1", json!({}));
            store.insert(&job).unwrap();
            job.fail(ErrorKind::FatalStageError, "no content").unwrap();
            store.update(&job).unwrap();

            let loaded = store.get("j1").unwrap().unwrap();
            assert_eq!(loaded.error_kind, Some(ErrorKind::FatalStageError));
            assert_eq!(loaded.error.as_deref(), Some("no content"));
        }
    }

    #[test]
    fn test_list_by_status_and_counts() {
        for store in stores() {
            for (id, status) in [
                ("a", JobStatus::Running),
                ("b", JobStatus::Completed),
                ("c", JobStatus::Completed),
            ] {
                let mut job = Job::new(id, json!({}));
                job.transition(JobStatus::Running).unwrap();
                if status == JobStatus::Completed {
                    job.transition(JobStatus::Completed).unwrap();
                }
                store.insert(&job).unwrap();
            }

            let completed = store
                .list(&JobQuery {
                    status: Some(JobStatus::Completed),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(completed.total, 2);
            assert!(completed.jobs.iter().all(|j| j.status == JobStatus::Completed));

            let counts = store.counts().unwrap();
            assert_eq!(counts.running, 1);
            assert_eq!(counts.completed, 2);
            assert_eq!(counts.total(), 3);
        }
    }

    #[test]
    fn test_delete() {
        for store in stores() {
            store.insert(&Job::new("j1", json!({}))).unwrap();
            assert!(store.delete("j1").unwrap());
            assert!(!store.delete("j1").unwrap());
            assert!(store.get("j1").unwrap().is_none());
        }
    }
}
