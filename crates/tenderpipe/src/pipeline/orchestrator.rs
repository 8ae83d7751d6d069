//! Runs the analysis stages for one submission as a tracked job.
//!
//! Stages run strictly in order. After each one the orchestrator upserts a
//! [`StageResult`] and reports progress on the job. A failing stage is
//! handled by the failure policy in effect: `fatal` persists an error
//! marker and fails the job, `degrade` persists an error-marked result
//! (with a fallback payload where one exists) and carries on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::Instrument;

use crate::ai::{build_model, ContextualModel};
use crate::broadcast::event_channel::panic_message;
use crate::broadcast::EventChannel;
use crate::config::{Config, FailurePolicy, PipelineSettings};
use crate::db::Database;
use crate::error::ErrorKind;
use crate::health::{HealthMonitor, SqliteHealthStore};
use crate::jobs::{Job, JobContext, JobFailure, JobManager, ProgressReporter, SqliteJobStore};
use crate::market::{build_sources, CachedPriceSource};

use super::data_pool::DataPool;
use super::error::{OrchestratorError, StageFailure};
use super::options::{AnalysisOptions, RunOptions};
use super::results::{AnalysisReport, ContextualResult, StageOutput};
use super::stage_store::{SqliteStageResultStore, StageResult, StageResultStore};
use super::stages::market::MarketSettings;
use super::stages::{contextual, decision, extraction, market};
use super::AnalysisStage;

/// Identifiers handed back to the caller as soon as a job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: String,
    pub analysis_id: String,
}

/// A validated submission whose job has been created but not started.
pub struct PreparedAnalysis {
    submission: Submission,
    pool: DataPool,
    run: RunOptions,
}

impl PreparedAnalysis {
    pub fn submission(&self) -> &Submission {
        &self.submission
    }
}

struct OrchestratorInner {
    jobs: JobManager,
    stages: Arc<dyn StageResultStore>,
    health: Arc<HealthMonitor>,
    model: Arc<dyn ContextualModel>,
    sources: Vec<CachedPriceSource>,
    settings: PipelineSettings,
}

/// Bookkeeping for one run of the pipeline.
struct RunState<'a> {
    analysis_id: &'a str,
    run: &'a RunOptions,
    ctx: &'a JobContext,
    degraded: Vec<AnalysisStage>,
    reused: Vec<AnalysisStage>,
    /// Set once a stage ran instead of being reused; later stages then run
    /// too, since their stored results may depend on stale input.
    recomputed: bool,
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl AnalysisOrchestrator {
    pub fn new(
        jobs: JobManager,
        stages: Arc<dyn StageResultStore>,
        health: Arc<HealthMonitor>,
        model: Arc<dyn ContextualModel>,
        sources: Vec<CachedPriceSource>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                jobs,
                stages,
                health,
                model,
                sources,
                settings,
            }),
        }
    }

    /// Wires the pipeline from configuration on top of one database: the
    /// health monitor restores its circuits, jobs left unfinished by a
    /// previous process are marked failed, and the model and price sources
    /// are built.
    pub fn from_config(config: &Config, db: Database) -> crate::Result<Self> {
        let health = HealthMonitor::with_store(
            config.health.clone(),
            Arc::new(SqliteHealthStore::new(db.clone())),
        )?;

        let jobs = JobManager::new(
            Arc::new(SqliteJobStore::new(db.clone())),
            EventChannel::new(),
            config.jobs.max_concurrent_jobs,
        );
        let recovered = jobs.recover_interrupted()?;
        if recovered > 0 {
            log::warn!("{} job(s) were interrupted by the last shutdown", recovered);
        }

        let pipeline = &config.pipeline;
        let model = build_model(&config.model, Duration::from_millis(pipeline.model_timeout_ms))?;
        let sources = build_sources(
            &config.price_sources,
            Duration::from_millis(pipeline.source_timeout_ms),
            Duration::from_secs(pipeline.quote_cache_ttl_secs),
        )?;
        log::info!(
            "Pipeline wired with model '{}' and {} price source(s)",
            model.name(),
            sources.len()
        );

        Ok(Self::new(
            jobs,
            Arc::new(SqliteStageResultStore::new(db)),
            Arc::new(health),
            model,
            sources,
            pipeline.clone(),
        ))
    }

    pub fn jobs(&self) -> &JobManager {
        &self.inner.jobs
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    // ─── Submission ─────────────────────────────────────────────────────────

    /// Validates the input and creates the job for a new analysis. Invalid
    /// input is rejected here and never creates a job.
    pub fn prepare(
        &self,
        pool: DataPool,
        options: &AnalysisOptions,
    ) -> Result<PreparedAnalysis, OrchestratorError> {
        pool.validate()?;
        let run = RunOptions::resolve(&self.inner.settings, options, false)?;
        let analysis_id = uuid::Uuid::new_v4().to_string();
        self.create(analysis_id, pool, run)
    }

    /// Prepares a new job for an existing analysis that reuses its stored,
    /// error-free stage results.
    pub fn prepare_retry(
        &self,
        analysis_id: &str,
        pool: DataPool,
    ) -> Result<PreparedAnalysis, OrchestratorError> {
        if self.inner.stages.list(analysis_id)?.is_empty() {
            return Err(OrchestratorError::AnalysisNotFound(analysis_id.to_string()));
        }
        pool.validate()?;
        let run = RunOptions::resolve(&self.inner.settings, &AnalysisOptions::default(), true)?;
        self.create(analysis_id.to_string(), pool, run)
    }

    /// Starts a new analysis in the background and returns its identifiers.
    pub fn submit(
        &self,
        pool: DataPool,
        options: &AnalysisOptions,
    ) -> Result<Submission, OrchestratorError> {
        let prepared = self.prepare(pool, options)?;
        Ok(self.spawn(prepared))
    }

    /// Re-runs an existing analysis in the background.
    pub fn retry(&self, analysis_id: &str, pool: DataPool) -> Result<Submission, OrchestratorError> {
        let prepared = self.prepare_retry(analysis_id, pool)?;
        Ok(self.spawn(prepared))
    }

    fn create(
        &self,
        analysis_id: String,
        pool: DataPool,
        run: RunOptions,
    ) -> Result<PreparedAnalysis, OrchestratorError> {
        let payload = json!({
            "analysisId": analysis_id,
            "documents": pool.documents.len(),
            "retry": run.reuse_stored,
            "options": {
                "enableContextual": run.enable_contextual,
                "enableMarket": run.enable_market,
                "failurePolicy": run.failure_policy,
            },
        });
        let job_id = self.inner.jobs.create_job(payload)?;
        log::info!("Analysis {} submitted as job {}", analysis_id, job_id);
        Ok(PreparedAnalysis {
            submission: Submission {
                job_id,
                analysis_id,
            },
            pool,
            run,
        })
    }

    fn spawn(&self, prepared: PreparedAnalysis) -> Submission {
        let submission = prepared.submission.clone();
        let this = self.clone();
        tokio::spawn(async move {
            let job_id = prepared.submission.job_id.clone();
            if let Err(e) = this.run(prepared).await {
                log::error!("Analysis job {} could not run: {}", job_id, e);
            }
        });
        submission
    }

    /// Runs a prepared analysis to its end and returns the final job.
    pub async fn run(&self, prepared: PreparedAnalysis) -> Result<Job, OrchestratorError> {
        let PreparedAnalysis {
            submission,
            pool,
            run,
        } = prepared;
        let span = tracing::info_span!(
            "analysis",
            job_id = %submission.job_id,
            analysis_id = %submission.analysis_id
        );

        let this = self.clone();
        let analysis_id = submission.analysis_id.clone();
        let job = self
            .inner
            .jobs
            .run_job(&submission.job_id, move |ctx| async move {
                this.execute(&ctx, &analysis_id, &pool, &run).await
            })
            .instrument(span)
            .await?;
        Ok(job)
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn stage_result(
        &self,
        analysis_id: &str,
        stage: &str,
    ) -> Result<Option<StageResult>, OrchestratorError> {
        let stage = AnalysisStage::parse(stage)
            .ok_or_else(|| OrchestratorError::UnknownStage(stage.to_string()))?;
        Ok(self.inner.stages.get(analysis_id, stage)?)
    }

    pub fn stage_results(&self, analysis_id: &str) -> Result<Vec<StageResult>, OrchestratorError> {
        Ok(self.inner.stages.list(analysis_id)?)
    }

    // ─── Pipeline ───────────────────────────────────────────────────────────

    async fn execute(
        &self,
        ctx: &JobContext,
        analysis_id: &str,
        pool: &DataPool,
        run: &RunOptions,
    ) -> Result<Value, JobFailure> {
        let started = Instant::now();
        let settings = &self.inner.settings;
        let mut state = RunState {
            analysis_id,
            run,
            ctx,
            degraded: Vec::new(),
            reused: Vec::new(),
            recomputed: false,
        };

        let fields = self
            .run_stage(&mut state, AnalysisStage::Extraction, None, async {
                extraction::extract(pool)
            })
            .await?;
        let Some(fields) = fields else {
            return Err(JobFailure::new(
                ErrorKind::FatalStageError,
                "Extraction produced no fields",
            ));
        };

        let contextual = if run.enable_contextual {
            let timeout = Duration::from_millis(settings.model_timeout_ms);
            self.run_stage(
                &mut state,
                AnalysisStage::Contextual,
                Some(ContextualResult::fallback()),
                contextual::analyze(
                    self.inner.model.as_ref(),
                    &self.inner.health,
                    timeout,
                    pool,
                    &fields,
                ),
            )
            .await?
        } else {
            skip(&mut state, AnalysisStage::Contextual)?;
            None
        };

        let market = if run.enable_market {
            let market_settings = MarketSettings {
                fan_out: settings.market_fan_out,
                source_timeout: Duration::from_millis(settings.source_timeout_ms),
            };
            self.run_stage(
                &mut state,
                AnalysisStage::Market,
                None,
                market::analyze(
                    &self.inner.sources,
                    &self.inner.health,
                    market_settings,
                    pool,
                    &fields,
                    ctx,
                ),
            )
            .await?
        } else {
            skip(&mut state, AnalysisStage::Market)?;
            None
        };

        let degraded = state.degraded.clone();
        let validation = self
            .run_stage(&mut state, AnalysisStage::Validation, None, async {
                Ok(decision::validate(
                    &fields,
                    contextual.as_ref(),
                    market.as_ref(),
                    &degraded,
                ))
            })
            .await?;

        let degraded_count = state.degraded.len();
        let decision = self
            .run_stage(&mut state, AnalysisStage::Decision, None, async {
                match validation.as_ref() {
                    Some(validation) => Ok(decision::decide(
                        validation,
                        contextual.as_ref(),
                        market.as_ref(),
                        degraded_count,
                    )),
                    None => Err(StageFailure::new(
                        ErrorKind::PartialStageError,
                        "No validation result to decide on",
                    )),
                }
            })
            .await?;

        let report = AnalysisReport {
            analysis_id: analysis_id.to_string(),
            fields,
            contextual,
            market,
            validation,
            decision,
            degraded_stages: state.degraded,
            reused_stages: state.reused,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        serde_json::to_value(&report).map_err(|e| {
            JobFailure::new(
                ErrorKind::FatalStageError,
                format!("Failed to serialize analysis report: {}", e),
            )
        })
    }

    /// Runs one stage under the checkpoint, persistence and failure-policy
    /// rules. Returns `None` when the stage degraded.
    async fn run_stage<T, Fut>(
        &self,
        state: &mut RunState<'_>,
        stage: AnalysisStage,
        fallback: Option<T>,
        work: Fut,
    ) -> Result<Option<T>, JobFailure>
    where
        T: StageOutput,
        Fut: Future<Output = Result<T, StageFailure>>,
    {
        state.ctx.checkpoint()?;

        if state.run.reuse_stored && !state.recomputed {
            if let Some(output) = self.reuse::<T>(state.analysis_id, stage) {
                log::info!("Reusing stored {} result of {}", stage, state.analysis_id);
                state.reused.push(stage);
                state
                    .ctx
                    .report(stage.as_str(), stage.progress(), Some(json!({"reused": true})));
                return Ok(Some(output));
            }
        }
        state.recomputed = true;

        let outcome = AssertUnwindSafe(work)
            .catch_unwind()
            .instrument(tracing::info_span!("stage", name = stage.as_str()))
            .await
            .unwrap_or_else(|payload| {
                Err(StageFailure::fatal(format!(
                    "Stage panicked: {}",
                    panic_message(&payload)
                )))
            });

        // Work finished after a cancel request is discarded.
        state.ctx.checkpoint()?;

        let failure = match outcome {
            Ok(output) => {
                let data = serde_json::to_value(&output).map_err(|e| {
                    JobFailure::new(
                        ErrorKind::FatalStageError,
                        format!("Failed to serialize {} result: {}", stage, e),
                    )
                })?;
                self.persist(&StageResult::completed(state.analysis_id, stage, data))?;
                state
                    .ctx
                    .report(stage.as_str(), stage.progress(), Some(output.summary()));
                return Ok(Some(output));
            }
            Err(failure) => failure,
        };

        // The policy overrides `failure.kind`.
        match state.run.policy(stage) {
            FailurePolicy::Fatal => {
                log::error!("{} stage of {} failed: {}", stage, state.analysis_id, failure);
                self.persist(&StageResult::failed(
                    state.analysis_id,
                    stage,
                    json!({}),
                    ErrorKind::FatalStageError,
                    failure.message.clone(),
                ))?;
                Err(JobFailure::new(
                    ErrorKind::FatalStageError,
                    format!("{} stage failed: {}", stage, failure.message),
                ))
            }
            FailurePolicy::Degrade => {
                log::warn!("{} stage of {} degraded: {}", stage, state.analysis_id, failure);
                let data = fallback
                    .and_then(|f| serde_json::to_value(f).ok())
                    .unwrap_or_else(|| json!({}));
                self.persist(&StageResult::failed(
                    state.analysis_id,
                    stage,
                    data,
                    ErrorKind::PartialStageError,
                    failure.message.clone(),
                ))?;
                state
                    .ctx
                    .warn(&format!("{} stage degraded: {}", stage, failure.message));
                state.ctx.report(
                    stage.as_str(),
                    stage.progress(),
                    Some(json!({"degraded": true, "error": failure.message})),
                );
                state.degraded.push(stage);
                Ok(None)
            }
        }
    }

    fn reuse<T: StageOutput>(&self, analysis_id: &str, stage: AnalysisStage) -> Option<T> {
        match self.inner.stages.get(analysis_id, stage) {
            Ok(Some(stored)) if stored.is_ok() => match serde_json::from_value(stored.result_data) {
                Ok(output) => Some(output),
                Err(e) => {
                    log::warn!("Stored {} result of {} is unreadable: {}", stage, analysis_id, e);
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to load {} result of {}: {}", stage, analysis_id, e);
                None
            }
        }
    }

    /// Upserts a stage result, retrying once.
    fn persist(&self, result: &StageResult) -> Result<(), JobFailure> {
        let store = &self.inner.stages;
        if let Err(first) = store.upsert(result) {
            log::warn!(
                "Persisting {} result of {} failed, retrying: {}",
                result.stage,
                result.analysis_id,
                first
            );
            store.upsert(result).map_err(|e| {
                JobFailure::new(
                    ErrorKind::PersistenceError,
                    format!("Failed to persist {} result: {}", result.stage, e),
                )
            })?;
        }
        Ok(())
    }
}

fn skip(state: &mut RunState<'_>, stage: AnalysisStage) -> Result<(), JobFailure> {
    state.ctx.checkpoint()?;
    state.recomputed = true;
    log::info!("{} stage of {} disabled", stage, state.analysis_id);
    state
        .ctx
        .report(stage.as_str(), stage.progress(), Some(json!({"skipped": true})));
    Ok(())
}
