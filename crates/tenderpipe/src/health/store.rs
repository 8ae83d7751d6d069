use chrono::{DateTime, Utc};

use crate::db::{health_repo, Database, DatabaseError};

use super::monitor::CircuitState;

/// Persisted counters of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub scraper_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: u64,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub last_error: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Write-through backing for [`super::HealthMonitor`].
pub trait HealthStore: Send + Sync {
    fn save(&self, snapshot: &HealthSnapshot) -> Result<(), DatabaseError>;
    fn load_all(&self) -> Result<Vec<HealthSnapshot>, DatabaseError>;
    fn delete(&self, scraper_name: &str) -> Result<(), DatabaseError>;
    fn delete_all(&self) -> Result<(), DatabaseError>;
}

pub struct SqliteHealthStore {
    db: Database,
}

impl SqliteHealthStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl HealthStore for SqliteHealthStore {
    fn save(&self, snapshot: &HealthSnapshot) -> Result<(), DatabaseError> {
        let row = health_repo::HealthRow {
            scraper_name: snapshot.scraper_name.clone(),
            success_count: snapshot.success_count,
            failure_count: snapshot.failure_count,
            total_latency_ms: snapshot.total_latency_ms,
            consecutive_failures: snapshot.consecutive_failures,
            circuit_state: snapshot.circuit_state.as_str().to_string(),
            last_error: snapshot.last_error.clone(),
            last_failure_at: snapshot.last_failure_at.map(|t| t.to_rfc3339()),
            last_success_at: snapshot.last_success_at.map(|t| t.to_rfc3339()),
            updated_at: Utc::now().to_rfc3339(),
        };
        health_repo::upsert(&self.db, &row)
    }

    fn load_all(&self) -> Result<Vec<HealthSnapshot>, DatabaseError> {
        let rows = health_repo::list_all(&self.db)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let circuit_state = CircuitState::parse(&row.circuit_state).unwrap_or_else(|| {
                    log::warn!(
                        "Unknown circuit state '{}' for '{}', treating as closed",
                        row.circuit_state,
                        row.scraper_name
                    );
                    CircuitState::Closed
                });
                HealthSnapshot {
                    scraper_name: row.scraper_name,
                    success_count: row.success_count,
                    failure_count: row.failure_count,
                    total_latency_ms: row.total_latency_ms,
                    consecutive_failures: row.consecutive_failures,
                    circuit_state,
                    last_error: row.last_error,
                    last_failure_at: parse_time(row.last_failure_at),
                    last_success_at: parse_time(row.last_success_at),
                }
            })
            .collect())
    }

    fn delete(&self, scraper_name: &str) -> Result<(), DatabaseError> {
        health_repo::delete(&self.db, scraper_name).map(|_| ())
    }

    fn delete_all(&self) -> Result<(), DatabaseError> {
        health_repo::delete_all(&self.db)
    }
}
