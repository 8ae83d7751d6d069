pub mod ai;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod jobs;
pub mod market;
pub mod pipeline;
pub mod stream;

pub use ai::{build_model, ContextualModel, HeuristicModel, HttpModel};
pub use broadcast::{EventChannel, EventType, ProgressEvent, Subscription};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ErrorKind, Result, TenderpipeError};
pub use health::{CircuitState, HealthMonitor, HealthReport, HealthStatus, SqliteHealthStore, SystemHealth};
pub use jobs::{Job, JobError, JobManager, JobQuery, JobStatus, SqliteJobStore};
pub use market::{build_sources, CachedPriceSource, PriceSource};
pub use pipeline::{
    AnalysisOptions, AnalysisOrchestrator, AnalysisReport, AnalysisStage, DataPool, OrchestratorError,
    SqliteStageResultStore, StageResult, Submission,
};
pub use stream::{job_events, StreamOptions};
