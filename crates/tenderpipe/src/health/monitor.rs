//! Per-source circuit breaker with rolling statistics.
//!
//! `closed` lets calls through. `failure_threshold` consecutive failures
//! open the circuit. Once `cooldown` has passed, the next attempt is let
//! through as a trial call (`half-open`): success closes the circuit, failure
//! reopens it and restarts the cooldown.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HealthConfig;
use crate::db::DatabaseError;

use super::store::{HealthSnapshot, HealthStore};

// ─── Public types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half-open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Health of one source as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub scraper_name: String,
    pub status: HealthStatus,
    /// Percentage with two decimals.
    pub success_rate: f64,
    /// Mean latency of successful calls, in milliseconds.
    pub average_response_time: f64,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Aggregate over every known source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub total_scrapers: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
    pub overall_success_rate: f64,
    pub scrapers: Vec<HealthReport>,
}

/// Outcome of [`HealthMonitor::call`].
#[derive(Error, Debug)]
pub enum GateError<E> {
    #[error("Source '{0}' is unavailable (circuit open)")]
    Unavailable(String),

    #[error(transparent)]
    Failed(E),
}

// ─── Record ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Circuit {
    Closed,
    Open { since: Instant },
    HalfOpen { since: Instant },
}

impl Circuit {
    fn state(&self) -> CircuitState {
        match self {
            Circuit::Closed => CircuitState::Closed,
            Circuit::Open { .. } => CircuitState::Open,
            Circuit::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    success: bool,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
struct ScraperRecord {
    success_count: u64,
    failure_count: u64,
    total_latency_ms: u64,
    consecutive_failures: u32,
    circuit: Circuit,
    window: VecDeque<Outcome>,
    last_error: Option<String>,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl ScraperRecord {
    fn new() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            total_latency_ms: 0,
            consecutive_failures: 0,
            circuit: Circuit::Closed,
            window: VecDeque::new(),
            last_error: None,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    fn from_snapshot(snapshot: &HealthSnapshot) -> Self {
        // Restored open circuits restart their cooldown.
        let circuit = match snapshot.circuit_state {
            CircuitState::Closed => Circuit::Closed,
            CircuitState::Open | CircuitState::HalfOpen => Circuit::Open {
                since: Instant::now(),
            },
        };
        Self {
            success_count: snapshot.success_count,
            failure_count: snapshot.failure_count,
            total_latency_ms: snapshot.total_latency_ms,
            consecutive_failures: snapshot.consecutive_failures,
            circuit,
            window: VecDeque::new(),
            last_error: snapshot.last_error.clone(),
            last_failure: None,
            last_failure_at: snapshot.last_failure_at,
            last_success_at: snapshot.last_success_at,
        }
    }

    fn snapshot(&self, name: &str) -> HealthSnapshot {
        HealthSnapshot {
            scraper_name: name.to_string(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            total_latency_ms: self.total_latency_ms,
            consecutive_failures: self.consecutive_failures,
            circuit_state: self.circuit.state(),
            last_error: self.last_error.clone(),
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
        }
    }

    fn push(&mut self, outcome: Outcome, window_size: usize) {
        self.window.push_back(outcome);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    /// (successes, failures, summed success latency) over the rolling
    /// window, or the lifetime counters when the window is empty.
    fn window_totals(&self) -> (u64, u64, u64) {
        if self.window.is_empty() {
            return (self.success_count, self.failure_count, self.total_latency_ms);
        }
        self.window
            .iter()
            .fold((0, 0, 0), |(ok, failed, latency), o| {
                if o.success {
                    (ok + 1, failed, latency + o.latency_ms)
                } else {
                    (ok, failed + 1, latency)
                }
            })
    }

    fn report(&self, name: &str) -> HealthReport {
        let (ok, failed, latency) = self.window_totals();
        let total = ok + failed;
        let success_rate = if total == 0 {
            100.0
        } else {
            round2(ok as f64 / total as f64 * 100.0)
        };
        let average_response_time = if ok == 0 {
            0.0
        } else {
            latency as f64 / ok as f64
        };
        let circuit_state = self.circuit.state();
        let status = if circuit_state == CircuitState::Open || success_rate < 30.0 {
            HealthStatus::Down
        } else if success_rate < 70.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            scraper_name: name.to_string(),
            status,
            success_rate,
            average_response_time,
            circuit_state,
            consecutive_failures: self.consecutive_failures,
            total_requests: self.success_count + self.failure_count,
            successful_requests: self.success_count,
            failed_requests: self.failure_count,
            last_error: self.last_error.clone(),
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ─── Monitor ────────────────────────────────────────────────────────────────

/// Tracks call outcomes per named external source and gates calls.
pub struct HealthMonitor {
    config: HealthConfig,
    records: Mutex<HashMap<String, ScraperRecord>>,
    store: Option<Arc<dyn HealthStore>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Creates a monitor that restores records from `store` and writes
    /// every change back to it.
    pub fn with_store(config: HealthConfig, store: Arc<dyn HealthStore>) -> Result<Self, DatabaseError> {
        let records = store
            .load_all()?
            .iter()
            .map(|s| (s.scraper_name.clone(), ScraperRecord::from_snapshot(s)))
            .collect::<HashMap<_, _>>();
        log::info!("Restored health records for {} source(s)", records.len());
        Ok(Self {
            config,
            records: Mutex::new(records),
            store: Some(store),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScraperRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Health monitor lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn cooldown(&self) -> Duration {
        self.config.cooldown()
    }

    fn save(&self, name: &str, record: &ScraperRecord) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save(&record.snapshot(name)) {
                log::warn!("Failed to persist health of '{}': {}", name, e);
            }
        }
    }

    /// Whether a call to `name` may be attempted now. An open circuit whose
    /// cooldown has elapsed admits exactly one trial call and turns half-open.
    pub fn is_healthy(&self, name: &str) -> bool {
        let cooldown = self.cooldown();
        let mut records = self.lock();
        let record = records
            .entry(name.to_string())
            .or_insert_with(ScraperRecord::new);

        match record.circuit {
            Circuit::Closed => true,
            Circuit::Open { since } | Circuit::HalfOpen { since } if since.elapsed() >= cooldown => {
                let was_open = matches!(record.circuit, Circuit::Open { .. });
                // A half-open trial call that never reported is replaced.
                record.circuit = Circuit::HalfOpen {
                    since: Instant::now(),
                };
                log::info!("Circuit for '{}' half-open, admitting a trial call", name);
                // Only the Open -> HalfOpen step changes the stored state.
                if was_open {
                    self.save(name, record);
                }
                true
            }
            Circuit::Open { .. } | Circuit::HalfOpen { .. } => false,
        }
    }

    pub fn record_success(&self, name: &str, latency_ms: u64) {
        let cooldown = self.cooldown();
        let window_size = self.config.window_size;
        let mut records = self.lock();
        let record = records
            .entry(name.to_string())
            .or_insert_with(ScraperRecord::new);

        record.success_count += 1;
        record.total_latency_ms += latency_ms;
        record.consecutive_failures = 0;
        record.last_success_at = Some(Utc::now());
        record.push(
            Outcome {
                success: true,
                latency_ms,
            },
            window_size,
        );

        match record.circuit {
            Circuit::HalfOpen { .. } => {
                record.circuit = Circuit::Closed;
                log::info!("Circuit for '{}' closed after a successful trial call", name);
            }
            Circuit::Open { since } if since.elapsed() >= cooldown => {
                record.circuit = Circuit::Closed;
                log::info!("Circuit for '{}' closed after cooldown success", name);
            }
            // A late success from a call issued before the circuit opened.
            Circuit::Open { .. } | Circuit::Closed => {}
        }
        self.save(name, record);
    }

    pub fn record_failure(&self, name: &str, reason: &str) {
        let cooldown = self.cooldown();
        let failure_window = self.config.failure_window();
        let threshold = self.config.failure_threshold;
        let window_size = self.config.window_size;
        let mut records = self.lock();
        let record = records
            .entry(name.to_string())
            .or_insert_with(ScraperRecord::new);

        if record
            .last_failure
            .is_some_and(|prev| prev.elapsed() > failure_window)
        {
            record.consecutive_failures = 0;
        }

        let now = Instant::now();
        record.failure_count += 1;
        record.consecutive_failures += 1;
        record.last_error = Some(reason.to_string());
        record.last_failure = Some(now);
        record.last_failure_at = Some(Utc::now());
        record.push(
            Outcome {
                success: false,
                latency_ms: 0,
            },
            window_size,
        );

        match record.circuit {
            Circuit::HalfOpen { .. } => {
                record.circuit = Circuit::Open { since: now };
                log::warn!("Trial call to '{}' failed, circuit reopened: {}", name, reason);
            }
            Circuit::Open { since } if since.elapsed() >= cooldown => {
                record.circuit = Circuit::Open { since: now };
                log::warn!("Trial call to '{}' failed, circuit reopened: {}", name, reason);
            }
            Circuit::Open { .. } => {}
            Circuit::Closed if record.consecutive_failures >= threshold => {
                record.circuit = Circuit::Open { since: now };
                log::warn!(
                    "Circuit for '{}' opened after {} consecutive failures: {}",
                    name,
                    record.consecutive_failures,
                    reason
                );
            }
            Circuit::Closed => {}
        }
        self.save(name, record);
    }

    /// Returns `None` for a source that has never been observed.
    pub fn get_health(&self, name: &str) -> Option<HealthReport> {
        self.lock().get(name).map(|r| r.report(name))
    }

    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.lock().get(name).map(|r| r.circuit.state())
    }

    pub fn system_health(&self) -> SystemHealth {
        let records = self.lock();
        let mut scrapers: Vec<HealthReport> = records
            .iter()
            .map(|(name, record)| record.report(name))
            .collect();
        drop(records);
        scrapers.sort_by(|a, b| a.scraper_name.cmp(&b.scraper_name));

        let count = |status: HealthStatus| scrapers.iter().filter(|r| r.status == status).count();
        let (ok, total) = scrapers.iter().fold((0u64, 0u64), |(ok, total), r| {
            (ok + r.successful_requests, total + r.total_requests)
        });
        let overall_success_rate = if total == 0 {
            100.0
        } else {
            round2(ok as f64 / total as f64 * 100.0)
        };

        SystemHealth {
            total_scrapers: scrapers.len(),
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            down: count(HealthStatus::Down),
            overall_success_rate,
            scrapers,
        }
    }

    /// Forgets one source. Returns false if it was unknown.
    pub fn reset(&self, name: &str) -> bool {
        let existed = self.lock().remove(name).is_some();
        if let Some(ref store) = self.store {
            if let Err(e) = store.delete(name) {
                log::warn!("Failed to delete health of '{}': {}", name, e);
            }
        }
        if existed {
            log::info!("Health record for '{}' reset", name);
        }
        existed
    }

    pub fn reset_all(&self) {
        self.lock().clear();
        if let Some(ref store) = self.store {
            if let Err(e) = store.delete_all() {
                log::warn!("Failed to clear stored health records: {}", e);
            }
        }
        log::info!("All health records reset");
    }

    /// Runs `call` through the gate and records its outcome with latency.
    pub async fn call<T, E, Fut>(&self, name: &str, call: Fut) -> Result<T, GateError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.is_healthy(name) {
            return Err(GateError::Unavailable(name.to_string()));
        }
        let started = Instant::now();
        match call.await {
            Ok(value) => {
                self.record_success(name, started.elapsed().as_millis() as u64);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(name, &e.to_string());
                Err(GateError::Failed(e))
            }
        }
    }
}
