//! Scraper health repository for the `scraper_health` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw scraper health row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRow {
    pub scraper_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: u64,
    pub consecutive_failures: u32,
    pub circuit_state: String,
    pub last_error: Option<String>,
    pub last_failure_at: Option<String>,
    pub last_success_at: Option<String>,
    pub updated_at: String,
}

impl HealthRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            scraper_name: row.get("scraper_name")?,
            success_count: row.get("success_count")?,
            failure_count: row.get("failure_count")?,
            total_latency_ms: row.get("total_latency_ms")?,
            consecutive_failures: row.get("consecutive_failures")?,
            circuit_state: row.get("circuit_state")?,
            last_error: row.get("last_error")?,
            last_failure_at: row.get("last_failure_at")?,
            last_success_at: row.get("last_success_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or replaces the record for one scraper.
pub fn upsert(db: &Database, row: &HealthRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scraper_health
                (scraper_name, success_count, failure_count, total_latency_ms,
                 consecutive_failures, circuit_state, last_error, last_failure_at,
                 last_success_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(scraper_name) DO UPDATE SET
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                total_latency_ms = excluded.total_latency_ms,
                consecutive_failures = excluded.consecutive_failures,
                circuit_state = excluded.circuit_state,
                last_error = excluded.last_error,
                last_failure_at = excluded.last_failure_at,
                last_success_at = excluded.last_success_at,
                updated_at = excluded.updated_at",
            params![
                row.scraper_name,
                row.success_count,
                row.failure_count,
                row.total_latency_ms,
                row.consecutive_failures,
                row.circuit_state,
                row.last_error,
                row.last_failure_at,
                row.last_success_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Loads every stored scraper record.
pub fn list_all(db: &Database) -> Result<Vec<HealthRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM scraper_health ORDER BY scraper_name")?;
        let rows = stmt
            .query_map([], HealthRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes one record. Returns false when none existed.
pub fn delete(db: &Database, scraper_name: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM scraper_health WHERE scraper_name = ?1",
            params![scraper_name],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes every record.
pub fn delete_all(db: &Database) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM scraper_health", [])?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, failures: u64) -> HealthRow {
        HealthRow {
            scraper_name: name.to_string(),
            success_count: 3,
            failure_count: failures,
            total_latency_ms: 300,
            consecutive_failures: failures as u32,
            circuit_state: "closed".to_string(),
            last_error: None,
            last_failure_at: None,
            last_success_at: Some("2026-01-01T00:00:00Z".to_string()),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_upsert_and_list() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, &row("b", 0)).unwrap();
        upsert(&db, &row("a", 1)).unwrap();
        upsert(&db, &row("a", 2)).unwrap();

        let rows = list_all(&db).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].scraper_name, "a");
        assert_eq!(rows[0].failure_count, 2);
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, &row("a", 0)).unwrap();
        upsert(&db, &row("b", 0)).unwrap();

        assert!(delete(&db, "a").unwrap());
        assert!(!delete(&db, "a").unwrap());
        delete_all(&db).unwrap();
        assert!(list_all(&db).unwrap().is_empty());
    }
}
