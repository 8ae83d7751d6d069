use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_price_sources")]
    pub price_sources: Vec<PriceSourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            jobs: JobsConfig::default(),
            health: HealthConfig::default(),
            stream: StreamConfig::default(),
            pipeline: PipelineSettings::default(),
            model: ModelConfig::default(),
            price_sources: default_price_sources(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

// ─── Server / storage / logging ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file. `None` uses the platform data directory.
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path {
            Some(ref p) => Some(PathBuf::from(p)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ─── Jobs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Jobs allowed to run at once; 0 disables the limit (no `queued` state).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

// ─── Health ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// A failure further apart than this from the previous one restarts
    /// the consecutive-failure count.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
    /// Number of most recent outcomes used for rates and latency.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000
}

fn default_failure_window_ms() -> u64 {
    300_000
}

fn default_window_size() -> usize {
    100
}

impl HealthConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            failure_window_ms: default_failure_window_ms(),
            window_size: default_window_size(),
        }
    }
}

// ─── Stream ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,
}

fn default_keepalive_ms() -> u64 {
    10_000
}

fn default_max_lifetime_ms() -> u64 {
    300_000
}

impl StreamConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_ms: default_keepalive_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
        }
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// What a stage failure does to the rest of the run.
///
/// The policy alone decides: a stage under `Degrade` degrades even when its
/// failure is classified `fatal_stage_error` (a caught panic, for one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the pipeline and fail the job.
    Fatal,
    /// Record an error-marked stage result and continue.
    Degrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicyTable {
    #[serde(default = "default_fatal")]
    pub extraction: FailurePolicy,
    #[serde(default = "default_degrade")]
    pub contextual: FailurePolicy,
    #[serde(default = "default_degrade")]
    pub market: FailurePolicy,
    #[serde(default = "default_degrade")]
    pub decision: FailurePolicy,
}

fn default_fatal() -> FailurePolicy {
    FailurePolicy::Fatal
}

fn default_degrade() -> FailurePolicy {
    FailurePolicy::Degrade
}

impl Default for FailurePolicyTable {
    fn default() -> Self {
        Self {
            extraction: FailurePolicy::Fatal,
            contextual: FailurePolicy::Degrade,
            market: FailurePolicy::Degrade,
            decision: FailurePolicy::Degrade,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_market_fan_out")]
    pub market_fan_out: usize,
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enable_contextual: bool,
    #[serde(default = "default_true")]
    pub enable_market: bool,
    #[serde(default = "default_quote_cache_ttl_secs")]
    pub quote_cache_ttl_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicyTable,
}

fn default_market_fan_out() -> usize {
    4
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

fn default_model_timeout_ms() -> u64 {
    60_000
}

fn default_quote_cache_ttl_secs() -> u64 {
    3600
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            market_fan_out: default_market_fan_out(),
            source_timeout_ms: default_source_timeout_ms(),
            model_timeout_ms: default_model_timeout_ms(),
            enable_contextual: true,
            enable_market: true,
            quote_cache_ttl_secs: default_quote_cache_ttl_secs(),
            failure_policy: FailurePolicyTable::default(),
        }
    }
}

// ─── External collaborators ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    /// HTTP endpoint of a remote model; `None` uses the built-in heuristics.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_model_name() -> String {
    "heuristic".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    Catalog,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSourceConfig {
    pub name: String,
    pub kind: PriceSourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_price_sources() -> Vec<PriceSourceConfig> {
    vec![PriceSourceConfig {
        name: "catalog".to_string(),
        kind: PriceSourceKind::Catalog,
        base_url: None,
    }]
}
