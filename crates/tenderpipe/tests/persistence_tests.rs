//! Analyses over the SQLite stores, including what survives a restart.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::catering_tender;
use common::harness::report_of;
use tenderpipe::config::{HealthConfig, PipelineSettings};
use tenderpipe::health::HealthStore;
use tenderpipe::jobs::JobStore;
use tenderpipe::market::{CachedPriceSource, CatalogPriceSource};
use tenderpipe::pipeline::{AnalysisOptions, AnalysisOrchestrator, AnalysisStage, StageResultStore};
use tenderpipe::{
    CircuitState, Database, ErrorKind, EventChannel, HealthMonitor, HeuristicModel, JobManager, JobStatus,
    SqliteHealthStore, SqliteJobStore, SqliteStageResultStore,
};

struct Stores {
    jobs: Arc<dyn JobStore>,
    stages: Arc<dyn StageResultStore>,
    health: Arc<dyn HealthStore>,
}

fn open(dir: &TempDir) -> Stores {
    let db = Database::open(&dir.path().join("tenderpipe.db")).unwrap();
    Stores {
        jobs: Arc::new(SqliteJobStore::new(db.clone())),
        stages: Arc::new(SqliteStageResultStore::new(db.clone())),
        health: Arc::new(SqliteHealthStore::new(db)),
    }
}

fn health_config() -> HealthConfig {
    HealthConfig {
        failure_threshold: 3,
        cooldown_ms: 3_600_000,
        ..Default::default()
    }
}

fn orchestrator(stores: &Stores) -> AnalysisOrchestrator {
    let jobs = JobManager::new(stores.jobs.clone(), EventChannel::new(), 0);
    jobs.recover_interrupted().unwrap();
    let health = Arc::new(HealthMonitor::with_store(health_config(), stores.health.clone()).unwrap());
    AnalysisOrchestrator::new(
        jobs,
        stores.stages.clone(),
        health,
        Arc::new(HeuristicModel::new()),
        vec![CachedPriceSource::new(
            Arc::new(CatalogPriceSource::new("catalog")),
            Duration::from_secs(60),
        )],
        PipelineSettings::default(),
    )
}

#[tokio::test]
async fn test_completed_analysis_survives_restart() {
    let dir = TempDir::new().unwrap();

    let (submission, finished) = {
        let stores = open(&dir);
        let orchestrator = orchestrator(&stores);
        let prepared = orchestrator
            .prepare(catering_tender().build(), &AnalysisOptions::default())
            .unwrap();
        let submission = prepared.submission().clone();
        let job = orchestrator.run(prepared).await.unwrap();
        (submission, job)
    };
    assert_eq!(finished.status, JobStatus::Completed);

    let stores = open(&dir);
    let orchestrator = orchestrator(&stores);

    let job = orchestrator
        .jobs()
        .get_job(&submission.job_id)
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let (stored, original) = (report_of(&job), report_of(&finished));
    assert_eq!(stored.analysis_id, original.analysis_id);
    assert_eq!(stored.fields, original.fields);
    assert_eq!(
        stored.decision.map(|d| d.recommendation),
        original.decision.map(|d| d.recommendation)
    );
    assert_eq!(
        stored.market.map(|m| m.total_cost),
        original.market.map(|m| m.total_cost)
    );

    let stages: Vec<AnalysisStage> = orchestrator
        .stage_results(&submission.analysis_id)
        .unwrap()
        .iter()
        .map(|r| r.stage)
        .collect();
    assert_eq!(stages, AnalysisStage::ALL.to_vec());

    let catalog = orchestrator.health().get_health("catalog").unwrap();
    assert_eq!(catalog.successful_requests, 3);
}

#[tokio::test]
async fn test_retry_after_restart_reuses_stored_results() {
    let dir = TempDir::new().unwrap();

    let analysis_id = {
        let stores = open(&dir);
        let orchestrator = orchestrator(&stores);
        let prepared = orchestrator
            .prepare(catering_tender().build(), &AnalysisOptions::default())
            .unwrap();
        let analysis_id = prepared.submission().analysis_id.clone();
        orchestrator.run(prepared).await.unwrap();
        analysis_id
    };

    let stores = open(&dir);
    let orchestrator = orchestrator(&stores);
    let prepared = orchestrator
        .prepare_retry(&analysis_id, catering_tender().build())
        .unwrap();
    let job = orchestrator.run(prepared).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(report_of(&job).reused_stages, AnalysisStage::ALL.to_vec());
    assert_eq!(job.payload["retry"], json!(true));
}

#[test]
fn test_unfinished_job_is_failed_on_restart() {
    let dir = TempDir::new().unwrap();

    let job_id = {
        let stores = open(&dir);
        let orchestrator = orchestrator(&stores);
        let prepared = orchestrator
            .prepare(catering_tender().build(), &AnalysisOptions::default())
            .unwrap();
        // Never run: the process "dies" with the job pending.
        prepared.submission().job_id.clone()
    };

    let stores = open(&dir);
    let orchestrator = orchestrator(&stores);
    let job = orchestrator.jobs().get_job(&job_id).unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::FatalStageError));
    assert!(job.error.unwrap().contains("restart"));
}

#[test]
fn test_open_circuit_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let stores = open(&dir);
        let monitor = HealthMonitor::with_store(health_config(), stores.health.clone()).unwrap();
        for _ in 0..3 {
            monitor.record_failure("priceX", "HTTP 503");
        }
        monitor.record_success("priceY", 30);
    }

    let stores = open(&dir);
    let monitor = HealthMonitor::with_store(health_config(), stores.health).unwrap();
    assert_eq!(monitor.circuit_state("priceX"), Some(CircuitState::Open));
    assert!(!monitor.is_healthy("priceX"));

    let report = monitor.get_health("priceX").unwrap();
    assert_eq!(report.failed_requests, 3);
    assert_eq!(report.last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(monitor.get_health("priceY").unwrap().average_response_time, 30.0);
}

#[test]
fn test_stage_upsert_replaces_current_record() {
    let dir = TempDir::new().unwrap();
    let stores = open(&dir);

    let first = tenderpipe::pipeline::StageResult::failed(
        "a1",
        AnalysisStage::Contextual,
        json!({}),
        ErrorKind::PartialStageError,
        "model down",
    );
    stores.stages.upsert(&first).unwrap();
    let second =
        tenderpipe::pipeline::StageResult::completed("a1", AnalysisStage::Contextual, json!({"score": 80}));
    stores.stages.upsert(&second).unwrap();

    let listed = stores.stages.list("a1").unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_ok());
    assert_eq!(listed[0].result_data, json!({"score": 80}));
}
