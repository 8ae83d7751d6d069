use serde::{Deserialize, Serialize};

use crate::config::{FailurePolicy, FailurePolicyTable, PipelineSettings};

use super::{AnalysisStage, OrchestratorError};

/// Per-submission overrides of the configured pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_contextual: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_market: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicyTable>,
}

/// Settings in effect for one run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunOptions {
    pub enable_contextual: bool,
    pub enable_market: bool,
    pub failure_policy: FailurePolicyTable,
    pub reuse_stored: bool,
}

impl RunOptions {
    pub fn resolve(
        settings: &PipelineSettings,
        options: &AnalysisOptions,
        reuse_stored: bool,
    ) -> Result<Self, OrchestratorError> {
        let failure_policy = options.failure_policy.unwrap_or(settings.failure_policy);
        if failure_policy.extraction != FailurePolicy::Fatal {
            return Err(OrchestratorError::InvalidOptions(
                "extraction failures are always fatal".to_string(),
            ));
        }
        Ok(Self {
            enable_contextual: options.enable_contextual.unwrap_or(settings.enable_contextual),
            enable_market: options.enable_market.unwrap_or(settings.enable_market),
            failure_policy,
            reuse_stored,
        })
    }

    pub fn policy(&self, stage: AnalysisStage) -> FailurePolicy {
        match stage {
            AnalysisStage::Extraction => FailurePolicy::Fatal,
            AnalysisStage::Contextual => self.failure_policy.contextual,
            AnalysisStage::Market => self.failure_policy.market,
            AnalysisStage::Validation | AnalysisStage::Decision => self.failure_policy.decision,
        }
    }
}
