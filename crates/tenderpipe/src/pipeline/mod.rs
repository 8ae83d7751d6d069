//! The analysis pipeline: extraction, contextual scoring, market pricing,
//! validation and decision, run as one tracked job per submission.

pub mod data_pool;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod results;
pub mod stage_store;
pub mod stages;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use data_pool::{DataPool, DataPoolError};
pub use error::{OrchestratorError, StageFailure};
pub use options::AnalysisOptions;
pub use orchestrator::{AnalysisOrchestrator, Submission};
pub use results::{AnalysisReport, StageOutput};
pub use stage_store::{
    InMemoryStageResultStore, SqliteStageResultStore, StageError, StageResult, StageResultStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Extraction,
    Contextual,
    Market,
    Validation,
    Decision,
}

impl AnalysisStage {
    pub const ALL: [AnalysisStage; 5] = [
        AnalysisStage::Extraction,
        AnalysisStage::Contextual,
        AnalysisStage::Market,
        AnalysisStage::Validation,
        AnalysisStage::Decision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Extraction => "extraction",
            AnalysisStage::Contextual => "contextual",
            AnalysisStage::Market => "market",
            AnalysisStage::Validation => "validation",
            AnalysisStage::Decision => "decision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Position in the pipeline.
    pub fn order(&self) -> u8 {
        match self {
            AnalysisStage::Extraction => 0,
            AnalysisStage::Contextual => 1,
            AnalysisStage::Market => 2,
            AnalysisStage::Validation => 3,
            AnalysisStage::Decision => 4,
        }
    }

    /// Job progress once this stage is done.
    pub fn progress(&self) -> u8 {
        match self {
            AnalysisStage::Extraction => 25,
            AnalysisStage::Contextual => 50,
            AnalysisStage::Market => 75,
            AnalysisStage::Validation => 90,
            AnalysisStage::Decision => 100,
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_parse_back() {
        for stage in AnalysisStage::ALL {
            assert_eq!(AnalysisStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(AnalysisStage::parse("summary"), None);
    }

    #[test]
    fn test_progress_increases_with_order() {
        let progress: Vec<u8> = AnalysisStage::ALL.iter().map(|s| s.progress()).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(AnalysisStage::Decision.progress(), 100);
    }
}
