//! Shared application state, wired from the configuration.

use anyhow::{Context, Result};
use tenderpipe::{AnalysisOrchestrator, Config, Database, StreamOptions};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: AnalysisOrchestrator,
    pub stream: StreamOptions,
}

impl AppState {
    pub fn from_config(config: &Config, db: Database) -> Result<Self> {
        let orchestrator =
            AnalysisOrchestrator::from_config(config, db).context("Failed to wire the analysis pipeline")?;

        Ok(Self {
            orchestrator,
            stream: StreamOptions::from(&config.stream),
        })
    }
}
