//! Builders for test inputs and scripted collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;

use tenderpipe::ai::{ContextualModel, ContextualRequest, HeuristicModel, ModelError};
use tenderpipe::db::DatabaseError;
use tenderpipe::market::{PriceQuote, PriceSource, SourceError};
use tenderpipe::pipeline::data_pool::{Amount, DateMention, DocumentInfo, Entity, LineItem, TextBlock};
use tenderpipe::pipeline::{
    AnalysisStage, DataPool, InMemoryStageResultStore, StageResult, StageResultStore,
};

// ─── Data pools ─────────────────────────────────────────────────────────────

/// Builder for `DataPool` inputs. Starts with a single document `d1`.
pub struct DataPoolBuilder {
    pool: DataPool,
}

impl DataPoolBuilder {
    pub fn new() -> Self {
        Self {
            pool: DataPool {
                documents: vec![DocumentInfo {
                    doc_id: "d1".to_string(),
                    name: Some("specification.pdf".to_string()),
                    mime_type: Some("application/pdf".to_string()),
                }],
                ..Default::default()
            },
        }
    }

    pub fn text(mut self, block_id: &str, text: &str) -> Self {
        self.pool.text_blocks.push(TextBlock {
            block_id: block_id.to_string(),
            doc_id: Some("d1".to_string()),
            text: text.to_string(),
        });
        self
    }

    pub fn entity(mut self, kind: &str, value: &str) -> Self {
        self.pool.entities.push(Entity {
            kind: kind.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn date(mut self, kind: &str, value: &str) -> Self {
        self.pool.dates.push(DateMention {
            kind: kind.to_string(),
            value: value.to_string(),
            source: None,
        });
        self
    }

    pub fn amount(mut self, kind: &str, value: f64) -> Self {
        self.pool.amounts.push(Amount {
            kind: kind.to_string(),
            value,
        });
        self
    }

    pub fn line_item(mut self, name: &str, portion_grams: Option<f64>) -> Self {
        self.pool.line_items.push(LineItem {
            name: name.to_string(),
            portion_grams,
            category: None,
        });
        self
    }

    pub fn build(self) -> DataPool {
        self.pool
    }
}

impl Default for DataPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete catering tender: every required field present, three line
/// items and a generous budget.
pub fn catering_tender() -> DataPoolBuilder {
    DataPoolBuilder::new()
        .text("b1", "Catering and meal service for the district hospital.")
        .text(
            "b2",
            "A penalty of 1% applies for every day of delayed delivery. Staff must hold a hygiene certificate.",
        )
        .entity("institution", "District Hospital")
        .entity("tender_id", "2026/1042")
        .date("tender_date", "2026-03-01")
        .date("contract_start", "2026-04-01")
        .amount("estimated_budget", 500_000.0)
        .amount("person_count", 100.0)
        .amount("day_count", 10.0)
        .amount("meals_per_day", 1.0)
        .line_item("rice", Some(80.0))
        .line_item("chicken", Some(150.0))
        .line_item("milk", Some(200.0))
}

// ─── Price sources ──────────────────────────────────────────────────────────

/// What a scripted source does for a product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Price(f64),
    NoData,
    Fail,
    Hang,
}

/// Price source answering from a per-product script, with `fallback` for
/// products it was not told about. Counts every call.
pub struct ScriptedSource {
    name: String,
    script: HashMap<String, Behavior>,
    fallback: Behavior,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(name: &str, fallback: Behavior) -> Self {
        Self {
            name: name.to_string(),
            script: HashMap::new(),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(mut self, product: &str, behavior: Behavior) -> Self {
        self.script.insert(product.to_string(), behavior);
        self
    }

    /// Handle on the call counter, usable after the source was moved.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, product: &str) -> Result<PriceQuote, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.get(product).copied().unwrap_or(self.fallback) {
            Behavior::Price(unit_price) => Ok(PriceQuote {
                product: product.to_string(),
                unit_price,
                currency: "TRY".to_string(),
                observed_at: Utc::now(),
            }),
            Behavior::NoData => Err(SourceError::NoData(product.to_string())),
            Behavior::Fail => Err(SourceError::UnexpectedStatus {
                status: 503,
                url: format!("http://{}.invalid/prices", self.name),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SourceError::Timeout(3_600_000))
            }
        }
    }
}

// ─── Models ─────────────────────────────────────────────────────────────────

/// Model whose every call fails with a 503.
pub struct FailingModel;

#[async_trait]
impl ContextualModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn analyze(&self, _request: &ContextualRequest) -> Result<Value, ModelError> {
        Err(ModelError::UnexpectedStatus(503))
    }
}

/// Model that panics mid-call.
pub struct PanickingModel;

#[async_trait]
impl ContextualModel for PanickingModel {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn analyze(&self, _request: &ContextualRequest) -> Result<Value, ModelError> {
        panic!("model runtime crashed");
    }
}

/// Heuristic model that signals `entered` when a call starts and then
/// waits for `release` before answering.
pub struct GatedModel {
    inner: HeuristicModel,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedModel {
    pub fn new() -> Self {
        Self {
            inner: HeuristicModel::new(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    pub fn entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    pub fn release(&self) -> Arc<Notify> {
        self.release.clone()
    }
}

#[async_trait]
impl ContextualModel for GatedModel {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(&self, request: &ContextualRequest) -> Result<Value, ModelError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.analyze(request).await
    }
}

/// Delegates to `inner` after failing the first `failures` calls.
pub struct FlakyModel<M> {
    inner: M,
    failures: usize,
    calls: AtomicUsize,
}

impl<M: ContextualModel> FlakyModel<M> {
    pub fn new(inner: M, failures: usize) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: ContextualModel> ContextualModel for FlakyModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn analyze(&self, request: &ContextualRequest) -> Result<Value, ModelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(ModelError::UnexpectedStatus(502));
        }
        self.inner.analyze(request).await
    }
}

// ─── Stores ─────────────────────────────────────────────────────────────────

/// Stage store that rejects the next `failures` writes, then behaves like
/// the in-memory store.
pub struct FlakyStageStore {
    inner: InMemoryStageResultStore,
    failures: Mutex<usize>,
    attempts: AtomicUsize,
}

impl FlakyStageStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryStageResultStore::new(),
            failures: Mutex::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of upserts attempted, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StageResultStore for FlakyStageStore {
    fn upsert(&self, result: &StageResult) -> Result<(), DatabaseError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut remaining = self.failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DatabaseError::Unavailable("disk full".to_string()));
            }
        }
        self.inner.upsert(result)
    }

    fn get(&self, analysis_id: &str, stage: AnalysisStage) -> Result<Option<StageResult>, DatabaseError> {
        self.inner.get(analysis_id, stage)
    }

    fn list(&self, analysis_id: &str) -> Result<Vec<StageResult>, DatabaseError> {
        self.inner.list(analysis_id)
    }
}
