//! Typed outputs of each pipeline stage. They only become JSON at the
//! stage store and job result boundary.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::market::FoodCategory;

use super::AnalysisStage;

/// Implemented by every stage output.
pub trait StageOutput: Serialize + DeserializeOwned + Send + 'static {
    /// Short summary attached to the stage's progress event.
    fn summary(&self) -> Value;
}

// ─── Extraction ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenderType {
    ServiceProcurement,
    GoodsProcurement,
    Construction,
    MealService,
    Catering,
}

/// A sentence lifted from the documents, with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedStatement {
    pub text: String,
    pub source_ref: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub institution: Option<String>,
    pub tender_id: Option<String>,
    pub tender_date: Option<NaiveDate>,
    pub contract_start: Option<NaiveDate>,
    pub estimated_budget: Option<f64>,
    pub person_count: Option<u32>,
    pub day_count: Option<u32>,
    pub meals_per_day: Option<u32>,
    pub tender_type: Option<TenderType>,
    #[serde(default)]
    pub penalty_clauses: Vec<SourcedStatement>,
}

impl ExtractedFields {
    /// Names of the fields a complete tender is expected to carry but this
    /// one lacks.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let present = [
            ("institution", self.institution.is_some()),
            ("tender_date", self.tender_date.is_some()),
            ("tender_type", self.tender_type.is_some()),
            ("person_count", self.person_count.is_some()),
            ("day_count", self.day_count.is_some()),
            ("estimated_budget", self.estimated_budget.is_some()),
        ];
        present
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }
}

impl StageOutput for ExtractedFields {
    fn summary(&self) -> Value {
        json!({
            "missingFields": self.missing_required(),
            "penaltyClauses": self.penalty_clauses.len(),
        })
    }
}

// ─── Contextual ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalRisk {
    pub level: RiskLevel,
    pub score: u8,
    #[serde(default)]
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDeviation {
    pub ratio: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFit {
    pub fit: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staffing {
    pub estimated_headcount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub score: u8,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualResult {
    pub operational_risk: OperationalRisk,
    pub cost_deviation: CostDeviation,
    pub schedule_fit: ScheduleFit,
    pub staffing: Staffing,
    #[serde(default)]
    pub equipment: Vec<String>,
    pub overall: OverallAssessment,
}

impl ContextualResult {
    /// Assessment stored when the model could not produce one.
    pub fn fallback() -> Self {
        Self {
            operational_risk: OperationalRisk {
                level: RiskLevel::Medium,
                score: 50,
                factors: vec!["Not enough data for a detailed assessment".to_string()],
            },
            cost_deviation: CostDeviation {
                ratio: 0.5,
                reasons: Vec::new(),
            },
            schedule_fit: ScheduleFit {
                fit: false,
                comment: String::new(),
            },
            staffing: Staffing {
                estimated_headcount: 0,
            },
            equipment: Vec::new(),
            overall: OverallAssessment {
                score: 0,
                summary: "Assessment unavailable".to_string(),
                recommendations: Vec::new(),
            },
        }
    }
}

impl StageOutput for ContextualResult {
    fn summary(&self) -> Value {
        json!({
            "riskLevel": self.operational_risk.level,
            "score": self.overall.score,
        })
    }
}

// ─── Market ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Priced,
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Priced,
    NoData,
    SkippedUnhealthy,
    Failed,
}

/// What happened when one source was asked about one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: String,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostItem {
    pub name: String,
    pub product: String,
    pub category: FoodCategory,
    pub quantity_kg: f64,
    pub unit_price: Option<f64>,
    pub total_price: f64,
    pub source: Option<String>,
    pub status: ItemStatus,
    pub attempts: Vec<SourceAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub food_cost: f64,
    pub labor_cost: f64,
    pub operational_cost: f64,
    pub overhead: f64,
    pub profit_margin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetRisk {
    Safe,
    Tight,
    Risky,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetComparison {
    pub budget: f64,
    pub difference: f64,
    pub margin_percentage: f64,
    pub risk_level: BudgetRisk,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub current_month: f64,
    pub next_month: f64,
    pub next_quarter: f64,
    pub seasonal_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketResult {
    pub items: Vec<CostItem>,
    pub breakdown: CostBreakdown,
    pub total_cost: f64,
    pub comparison: Option<BudgetComparison>,
    pub forecast: Forecast,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl MarketResult {
    pub fn priced_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Priced)
            .count()
    }

    pub fn no_data_count(&self) -> usize {
        self.items.len() - self.priced_count()
    }
}

impl StageOutput for MarketResult {
    fn summary(&self) -> Value {
        json!({
            "items": self.items.len(),
            "priced": self.priced_count(),
            "noData": self.no_data_count(),
            "totalCost": self.total_cost,
        })
    }
}

// ─── Validation and decision ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn weight(&self) -> i32 {
        match self {
            Severity::Critical => 20,
            Severity::High => 10,
            Severity::Medium => 5,
            Severity::Low => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
    pub data_quality_score: u8,
}

impl StageOutput for ValidationResult {
    fn summary(&self) -> Value {
        json!({
            "isValid": self.is_valid,
            "errors": self.errors.len(),
            "warnings": self.warnings.len(),
            "dataQualityScore": self.data_quality_score,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Participate,
    ParticipateWithCaution,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl StageOutput for DecisionResult {
    fn summary(&self) -> Value {
        json!({
            "recommendation": self.recommendation,
            "confidence": self.confidence,
        })
    }
}

// ─── Report ─────────────────────────────────────────────────────────────────

/// Final result of an analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis_id: String,
    pub fields: ExtractedFields,
    pub contextual: Option<ContextualResult>,
    pub market: Option<MarketResult>,
    pub validation: Option<ValidationResult>,
    pub decision: Option<DecisionResult>,
    pub degraded_stages: Vec<AnalysisStage>,
    pub reused_stages: Vec<AnalysisStage>,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_fields() {
        let mut fields = ExtractedFields::default();
        assert_eq!(fields.missing_required().len(), 6);

        fields.institution = Some("City Hospital".to_string());
        fields.person_count = Some(500);
        assert_eq!(
            fields.missing_required(),
            vec!["tender_date", "tender_type", "day_count", "estimated_budget"]
        );
    }

    #[test]
    fn test_fallback_assessment_shape() {
        let value = serde_json::to_value(ContextualResult::fallback()).unwrap();
        assert_eq!(value["operational_risk"]["level"], "medium");
        assert_eq!(value["operational_risk"]["score"], 50);
        assert_eq!(value["overall"]["score"], 0);
    }

    #[test]
    fn test_contextual_result_tolerates_missing_lists() {
        let parsed: ContextualResult = serde_json::from_value(json!({
            "operational_risk": {"level": "high", "score": 80},
            "cost_deviation": {"ratio": 0.4},
            "schedule_fit": {"fit": true},
            "staffing": {"estimated_headcount": 12},
            "overall": {"score": 61, "summary": "ok"}
        }))
        .unwrap();
        assert_eq!(parsed.operational_risk.level, RiskLevel::High);
        assert!(parsed.equipment.is_empty());
    }
}
