//! Test harness for running analyses end to end.
//!
//! `TestHarness` wires an orchestrator the way the server does, but over
//! in-memory stores and with collaborators chosen by the test. Analyses can
//! be run inline (`prepare` + `run`) for deterministic assertions, or in the
//! background through `submit` and awaited with `wait_for_terminal`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tenderpipe::ai::{ContextualModel, HeuristicModel};
use tenderpipe::broadcast::{EventChannel, ProgressEvent, Subscription};
use tenderpipe::config::{HealthConfig, PipelineSettings};
use tenderpipe::health::HealthMonitor;
use tenderpipe::jobs::{InMemoryJobStore, Job, JobManager};
use tenderpipe::market::{CachedPriceSource, CatalogPriceSource, PriceSource};
use tenderpipe::pipeline::{
    AnalysisOptions, AnalysisOrchestrator, AnalysisReport, AnalysisStage, DataPool,
    InMemoryStageResultStore, StageResult, StageResultStore, Submission,
};

/// Collects every event published for one job.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
    _subscription: Subscription,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Progress values carried by the recorded events, in order.
    pub fn progress(&self) -> Vec<u8> {
        self.events().iter().filter_map(|e| e.progress).collect()
    }

    /// Stages named by the recorded events, in order, without repeats.
    pub fn stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = Vec::new();
        for stage in self.events().iter().filter_map(|e| e.stage.clone()) {
            if stages.last() != Some(&stage) {
                stages.push(stage);
            }
        }
        stages
    }
}

pub struct HarnessBuilder {
    model: Arc<dyn ContextualModel>,
    /// `None` uses the built-in catalog.
    sources: Option<Vec<Arc<dyn PriceSource>>>,
    stages: Arc<dyn StageResultStore>,
    settings: PipelineSettings,
    health: HealthConfig,
    max_concurrent_jobs: usize,
}

impl HarnessBuilder {
    pub fn model(mut self, model: impl ContextualModel + 'static) -> Self {
        self.model = Arc::new(model);
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ContextualModel>) -> Self {
        self.model = model;
        self
    }

    /// Appends a price source. The first call replaces the default catalog.
    pub fn source(mut self, source: impl PriceSource + 'static) -> Self {
        self.sources
            .get_or_insert_with(Vec::new)
            .push(Arc::new(source));
        self
    }

    pub fn no_sources(mut self) -> Self {
        self.sources = Some(Vec::new());
        self
    }

    pub fn stage_store(mut self, store: Arc<dyn StageResultStore>) -> Self {
        self.stages = store;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.health.failure_threshold = threshold;
        self
    }

    pub fn max_concurrent_jobs(mut self, limit: usize) -> Self {
        self.max_concurrent_jobs = limit;
        self
    }

    pub fn build(self) -> TestHarness {
        let jobs = JobManager::new(
            Arc::new(InMemoryJobStore::new()),
            EventChannel::new(),
            self.max_concurrent_jobs,
        );
        let health = Arc::new(HealthMonitor::new(self.health));
        // Long TTL keeps the cache out of the way within one test.
        let sources = self
            .sources
            .unwrap_or_else(|| {
                let catalog: Arc<dyn PriceSource> = Arc::new(CatalogPriceSource::new("catalog"));
                vec![catalog]
            })
            .into_iter()
            .map(|s| CachedPriceSource::new(s, Duration::from_secs(3600)))
            .collect();
        let orchestrator = AnalysisOrchestrator::new(
            jobs,
            self.stages.clone(),
            health.clone(),
            self.model,
            sources,
            self.settings,
        );
        TestHarness {
            orchestrator,
            stages: self.stages,
            health,
        }
    }
}

/// Isolated orchestrator with in-memory stores.
pub struct TestHarness {
    pub orchestrator: AnalysisOrchestrator,
    pub stages: Arc<dyn StageResultStore>,
    pub health: Arc<HealthMonitor>,
}

impl TestHarness {
    /// Heuristic model, the built-in catalog as the only price source, and
    /// a health monitor whose circuits stay open for the whole test.
    pub fn builder() -> HarnessBuilder {
        let settings = PipelineSettings {
            source_timeout_ms: 500,
            model_timeout_ms: 2_000,
            ..Default::default()
        };
        HarnessBuilder {
            model: Arc::new(HeuristicModel::new()),
            sources: None,
            stages: Arc::new(InMemoryStageResultStore::new()),
            settings,
            health: HealthConfig {
                failure_threshold: 3,
                cooldown_ms: 3_600_000,
                ..Default::default()
            },
            max_concurrent_jobs: 0,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn jobs(&self) -> &JobManager {
        self.orchestrator.jobs()
    }

    /// Runs an analysis to its end on the current task.
    pub async fn analyze(&self, pool: DataPool, options: AnalysisOptions) -> (Submission, Job) {
        let prepared = self
            .orchestrator
            .prepare(pool, &options)
            .expect("submission should be accepted");
        let submission = prepared.submission().clone();
        let job = self
            .orchestrator
            .run(prepared)
            .await
            .expect("job should run");
        (submission, job)
    }

    /// Same as `analyze`, recording every event from before the start.
    pub async fn analyze_recorded(
        &self,
        pool: DataPool,
        options: AnalysisOptions,
    ) -> (Submission, Job, EventRecorder) {
        let prepared = self
            .orchestrator
            .prepare(pool, &options)
            .expect("submission should be accepted");
        let submission = prepared.submission().clone();
        let recorder = self.record_events(&submission.job_id);
        let job = self
            .orchestrator
            .run(prepared)
            .await
            .expect("job should run");
        (submission, job, recorder)
    }

    /// Re-runs a stored analysis on the current task.
    pub async fn retry(&self, analysis_id: &str, pool: DataPool) -> (Submission, Job) {
        let prepared = self
            .orchestrator
            .prepare_retry(analysis_id, pool)
            .expect("retry should be accepted");
        let submission = prepared.submission().clone();
        let job = self
            .orchestrator
            .run(prepared)
            .await
            .expect("job should run");
        (submission, job)
    }

    pub fn record_events(&self, job_id: &str) -> EventRecorder {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = self
            .jobs()
            .subscribe(job_id, move |event: &ProgressEvent| {
                sink.lock().unwrap().push(event.clone());
            })
            .expect("job should exist");
        EventRecorder {
            events,
            _subscription: subscription,
        }
    }

    /// Polls until the job reaches a terminal status.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Job {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self
                .jobs()
                .get_job(job_id)
                .expect("job lookup should succeed")
                .expect("job should exist");
            if job.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                job_id,
                job.status,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn stage(&self, analysis_id: &str, stage: AnalysisStage) -> Option<StageResult> {
        self.stages
            .get(analysis_id, stage)
            .expect("stage lookup should succeed")
    }

    pub fn stage_results(&self, analysis_id: &str) -> Vec<StageResult> {
        self.stages
            .list(analysis_id)
            .expect("stage listing should succeed")
    }
}

/// Decodes the final report of a completed job.
pub fn report_of(job: &Job) -> AnalysisReport {
    let result = job.result.clone().expect("completed job should carry a result");
    serde_json::from_value(result).expect("result should be an analysis report")
}
