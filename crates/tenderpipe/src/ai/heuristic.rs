use async_trait::async_trait;
use serde_json::Value;

use crate::pipeline::results::{
    ContextualResult, CostDeviation, OperationalRisk, OverallAssessment, RiskLevel, ScheduleFit,
    Staffing,
};

use super::{ContextualModel, ContextualRequest, ModelError};

const EQUIPMENT_KEYWORDS: &[(&str, &str)] = &[
    ("oven", "Industrial ovens"),
    ("refrigerat", "Cold storage"),
    ("cold chain", "Cold storage"),
    ("dishwasher", "Dishwashing line"),
    ("vehicle", "Delivery vehicles"),
    ("kitchen", "Production kitchen"),
];

/// Guests served per kitchen staff member.
const GUESTS_PER_STAFF: u32 = 100;

/// Field and keyword based scoring without any I/O.
pub struct HeuristicModel {
    name: String,
}

impl HeuristicModel {
    pub fn new() -> Self {
        Self {
            name: "heuristic".to_string(),
        }
    }

    pub fn assess(request: &ContextualRequest) -> ContextualResult {
        let fields = &request.fields;
        let mut factors = Vec::new();
        let mut reasons = Vec::new();

        let penalties = fields.penalty_clauses.len();
        if penalties > 0 {
            factors.push(format!("{} penalty clause(s)", penalties));
            reasons.push("Penalty clauses can erode margin".to_string());
        }

        let lead_days = match (fields.tender_date, fields.contract_start) {
            (Some(tender), Some(start)) => Some((start - tender).num_days()),
            _ => None,
        };
        let schedule_fit = match lead_days {
            Some(days) if days >= 7 => ScheduleFit {
                fit: true,
                comment: format!("{} days between award and start", days),
            },
            Some(days) => {
                factors.push(format!("Only {} days of preparation", days));
                ScheduleFit {
                    fit: false,
                    comment: format!("{} days between award and start is too short", days),
                }
            }
            None => ScheduleFit {
                fit: false,
                comment: "Tender or contract start date unknown".to_string(),
            },
        };

        if fields.estimated_budget.is_none() {
            factors.push("No estimated budget published".to_string());
            reasons.push("Cost cannot be checked against a budget".to_string());
        }
        if fields.person_count.is_some_and(|n| n > 5000) {
            factors.push("Very large number of guests".to_string());
        }
        if fields.day_count.is_some_and(|d| d > 730) {
            factors.push("Contract longer than two years".to_string());
            reasons.push("Long contracts are exposed to price inflation".to_string());
        }

        let risk_score = (30 + 15 * factors.len()).min(100) as u8;
        let level = match risk_score {
            0..=39 => RiskLevel::Low,
            40..=69 => RiskLevel::Medium,
            _ => RiskLevel::High,
        };

        let mut equipment: Vec<String> = Vec::new();
        for block in &request.key_blocks {
            let lower = block.text.to_lowercase();
            for (keyword, label) in EQUIPMENT_KEYWORDS {
                if lower.contains(keyword) && !equipment.iter().any(|e| e == label) {
                    equipment.push((*label).to_string());
                }
            }
        }

        let estimated_headcount = fields
            .person_count
            .map_or(0, |n| n.div_ceil(GUESTS_PER_STAFF).max(1));

        let mut recommendations = Vec::new();
        if penalties > 0 {
            recommendations.push("Price penalty exposure into the bid".to_string());
        }
        if !schedule_fit.fit {
            recommendations.push("Confirm the mobilisation schedule with the institution".to_string());
        }

        let overall_score = 100u8.saturating_sub(risk_score / 2 + 5 * penalties.min(6) as u8);
        let summary = match level {
            RiskLevel::Low => "Low operational risk",
            RiskLevel::Medium => "Moderate operational risk",
            RiskLevel::High => "High operational risk",
        };

        ContextualResult {
            operational_risk: OperationalRisk {
                level,
                score: risk_score,
                factors,
            },
            cost_deviation: CostDeviation {
                ratio: (0.2 + 0.1 * penalties as f64).min(0.9),
                reasons,
            },
            schedule_fit,
            staffing: Staffing {
                estimated_headcount,
            },
            equipment,
            overall: OverallAssessment {
                score: overall_score,
                summary: summary.to_string(),
                recommendations,
            },
        }
    }
}

impl Default for HeuristicModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextualModel for HeuristicModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, request: &ContextualRequest) -> Result<Value, ModelError> {
        serde_json::to_value(Self::assess(request)).map_err(|e| ModelError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::KeyBlock;
    use crate::pipeline::results::{ExtractedFields, SourcedStatement};
    use chrono::NaiveDate;

    fn request(fields: ExtractedFields) -> ContextualRequest {
        ContextualRequest {
            fields,
            key_blocks: vec![KeyBlock {
                block_id: "b1".to_string(),
                text: "The contractor provides the kitchen, ovens and refrigerated storage.".to_string(),
            }],
            tables: Vec::new(),
        }
    }

    #[test]
    fn test_well_specified_tender_is_low_risk() {
        let fields = ExtractedFields {
            tender_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            contract_start: NaiveDate::from_ymd_opt(2026, 4, 1),
            estimated_budget: Some(1_000_000.0),
            person_count: Some(450),
            ..Default::default()
        };
        let result = HeuristicModel::assess(&request(fields));
        assert_eq!(result.operational_risk.level, RiskLevel::Low);
        assert!(result.schedule_fit.fit);
        assert_eq!(result.staffing.estimated_headcount, 5);
        assert_eq!(
            result.equipment,
            vec!["Industrial ovens", "Cold storage", "Production kitchen"]
        );
        assert_eq!(result.overall.score, 85);
    }

    #[test]
    fn test_risk_factors_accumulate() {
        let clause = SourcedStatement {
            text: "penalty".to_string(),
            source_ref: vec![],
            confidence: 0.9,
        };
        let fields = ExtractedFields {
            tender_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            contract_start: NaiveDate::from_ymd_opt(2026, 3, 3),
            day_count: Some(1000),
            penalty_clauses: vec![clause.clone(), clause],
            ..Default::default()
        };
        let result = HeuristicModel::assess(&request(fields));
        // penalties, short lead time, no budget, long contract
        assert_eq!(result.operational_risk.factors.len(), 4);
        assert_eq!(result.operational_risk.score, 90);
        assert_eq!(result.operational_risk.level, RiskLevel::High);
        assert!(!result.schedule_fit.fit);
        assert!((result.cost_deviation.ratio - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyze_returns_parseable_json() {
        let model = HeuristicModel::new();
        let value = model.analyze(&request(ExtractedFields::default())).await.unwrap();
        let parsed: ContextualResult = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.staffing.estimated_headcount, 0);
        assert_eq!(model.name(), "heuristic");
    }
}
