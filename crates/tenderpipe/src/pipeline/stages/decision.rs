//! Validation and recommendation over everything the earlier stages found.

use crate::pipeline::results::{
    BudgetRisk, ContextualResult, DecisionResult, ExtractedFields, MarketResult, Recommendation,
    RiskLevel, Severity, ValidationIssue, ValidationResult, ValidationWarning,
};
use crate::pipeline::AnalysisStage;

use super::round2;

const MISSING_FIELD_PENALTY: i32 = 10;
const WARNING_PENALTY: i32 = 2;

const MIN_PERSONS: u32 = 10;
const MAX_PERSONS: u32 = 10_000;
const MAX_DAYS: u32 = 730;
const MIN_BUDGET: f64 = 10_000.0;
const MIN_LEAD_DAYS: i64 = 7;

/// Monthly labor cost of one kitchen staff member.
const MONTHLY_WAGE: f64 = 15_000.0;
const LABOR_TOLERANCE: f64 = 0.3;

const CAUTION_QUALITY: u8 = 60;
const DEGRADED_CONFIDENCE_PENALTY: f64 = 0.15;

#[derive(Default)]
struct Findings {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationWarning>,
}

impl Findings {
    fn error(&mut self, field: &str, severity: Severity, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            message: message.into(),
            severity,
        });
    }

    fn warn(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.into(),
        });
    }
}

fn check_fields(fields: &ExtractedFields, findings: &mut Findings) {
    if fields.tender_date.is_none() {
        findings.error("tender_date", Severity::High, "Tender date is missing");
    }
    if let Some(persons) = fields.person_count {
        if !(MIN_PERSONS..=MAX_PERSONS).contains(&persons) {
            findings.warn(
                "person_count",
                format!("Person count {} is outside {}..={}", persons, MIN_PERSONS, MAX_PERSONS),
            );
        }
    }
    match fields.day_count {
        Some(0) => findings.error("day_count", Severity::High, "Contract has no days"),
        Some(days) if days > MAX_DAYS => {
            findings.warn("day_count", format!("Contract runs for {} days", days))
        }
        _ => {}
    }
    if let Some(budget) = fields.estimated_budget {
        if budget < MIN_BUDGET {
            findings.warn("estimated_budget", format!("Budget {:.2} is unusually low", budget));
        }
    }
    if let (Some(tender), Some(start)) = (fields.tender_date, fields.contract_start) {
        let lead = (start - tender).num_days();
        if lead < 0 {
            findings.error(
                "contract_start",
                Severity::High,
                "Contract starts before the tender date",
            );
        } else if lead < MIN_LEAD_DAYS {
            findings.warn(
                "contract_start",
                format!("Only {} days between tender and contract start", lead),
            );
        }
    }
}

fn check_market(market: &MarketResult, findings: &mut Findings) {
    if market.priced_count() == 0 {
        findings.error("market.items", Severity::High, "No item could be priced");
    } else if market.total_cost <= 0.0 {
        findings.error("market.total_cost", Severity::Critical, "Calculated total cost is not positive");
    }
    if market
        .comparison
        .as_ref()
        .is_some_and(|c| c.risk_level == BudgetRisk::Risky)
    {
        findings.error("market.budget", Severity::High, "Budget does not cover the calculated cost");
    }
    for item in market.items.iter().filter(|i| i.unit_price.is_none()) {
        findings.warn("market.items", format!("No price data for '{}'", item.name));
    }
}

fn check_consistency(
    fields: &ExtractedFields,
    contextual: &ContextualResult,
    market: Option<&MarketResult>,
    findings: &mut Findings,
) {
    let Some(market) = market else { return };

    let safe_budget = market
        .comparison
        .as_ref()
        .is_some_and(|c| c.risk_level == BudgetRisk::Safe);
    if contextual.operational_risk.level == RiskLevel::High && safe_budget {
        findings.warn(
            "contextual.operational_risk",
            "High operational risk despite a comfortable budget",
        );
    }

    let headcount = f64::from(contextual.staffing.estimated_headcount);
    if let Some(days) = fields.day_count {
        let expected = headcount * MONTHLY_WAGE * f64::from(days) / 30.0;
        let labor = market.breakdown.labor_cost;
        if expected > 0.0 && labor > 0.0 && ((labor - expected) / expected).abs() > LABOR_TOLERANCE {
            findings.warn(
                "market.breakdown.labor_cost",
                format!(
                    "Labor cost {:.0} does not match {} staff ({:.0} expected)",
                    labor, contextual.staffing.estimated_headcount, expected
                ),
            );
        }
    }
}

/// Scores the data quality of an analysis. `contextual` is `None` when that
/// stage was skipped or degraded.
pub fn validate(
    fields: &ExtractedFields,
    contextual: Option<&ContextualResult>,
    market: Option<&MarketResult>,
    degraded: &[AnalysisStage],
) -> ValidationResult {
    let mut findings = Findings::default();

    check_fields(fields, &mut findings);
    if let Some(market) = market {
        check_market(market, &mut findings);
    }
    if let Some(contextual) = contextual {
        check_consistency(fields, contextual, market, &mut findings);
    }
    for stage in degraded {
        findings.error(stage.as_str(), Severity::Medium, "Stage degraded; its result is partial");
    }

    let missing = fields.missing_required().len() as i32;
    let score = 100
        - MISSING_FIELD_PENALTY * missing
        - findings.errors.iter().map(|e| e.severity.weight()).sum::<i32>()
        - WARNING_PENALTY * findings.warnings.len() as i32;

    ValidationResult {
        is_valid: !findings.errors.iter().any(|e| e.severity == Severity::Critical),
        errors: findings.errors,
        warnings: findings.warnings,
        data_quality_score: score.clamp(0, 100) as u8,
    }
}

pub fn decide(
    validation: &ValidationResult,
    contextual: Option<&ContextualResult>,
    market: Option<&MarketResult>,
    degraded_count: usize,
) -> DecisionResult {
    let budget_risk = market.and_then(|m| m.comparison.as_ref()).map(|c| c.risk_level);
    let mut reasons = Vec::new();

    let recommendation = if budget_risk == Some(BudgetRisk::Risky) {
        reasons.push("Budget does not cover the calculated cost".to_string());
        Recommendation::Decline
    } else if !validation.is_valid {
        reasons.extend(
            validation
                .errors
                .iter()
                .filter(|e| e.severity == Severity::Critical)
                .map(|e| e.message.clone()),
        );
        Recommendation::Decline
    } else {
        if contextual.is_some_and(|c| c.operational_risk.level == RiskLevel::High) {
            reasons.push("Operational risk is high".to_string());
        }
        if budget_risk == Some(BudgetRisk::Tight) {
            reasons.push("Budget margin is tight".to_string());
        }
        if validation.data_quality_score < CAUTION_QUALITY {
            reasons.push(format!(
                "Data quality score is {}",
                validation.data_quality_score
            ));
        }
        if market.is_none() {
            reasons.push("No market analysis available".to_string());
        }

        if reasons.is_empty() {
            reasons.push("Budget margin and operational risk are acceptable".to_string());
            Recommendation::Participate
        } else {
            Recommendation::ParticipateWithCaution
        }
    };

    let confidence = f64::from(validation.data_quality_score) / 100.0
        * (1.0 - DEGRADED_CONFIDENCE_PENALTY * degraded_count as f64);

    DecisionResult {
        recommendation,
        confidence: round2(confidence.clamp(0.0, 1.0)),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::FoodCategory;
    use crate::pipeline::results::{
        BudgetComparison, CostBreakdown, CostItem, Forecast, ItemStatus, TenderType,
    };
    use chrono::NaiveDate;

    fn complete_fields() -> ExtractedFields {
        ExtractedFields {
            institution: Some("City Hospital".to_string()),
            tender_id: Some("2026/123".to_string()),
            tender_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            contract_start: NaiveDate::from_ymd_opt(2026, 4, 1),
            estimated_budget: Some(2_000_000.0),
            person_count: Some(500),
            day_count: Some(365),
            meals_per_day: Some(3),
            tender_type: Some(TenderType::MealService),
            penalty_clauses: Vec::new(),
        }
    }

    fn market(priced: bool, risk: BudgetRisk) -> MarketResult {
        let item = CostItem {
            name: "rice".to_string(),
            product: "rice".to_string(),
            category: FoodCategory::Grain,
            quantity_kg: 100.0,
            unit_price: priced.then_some(45.0),
            total_price: if priced { 4500.0 } else { 0.0 },
            source: priced.then(|| "catalog".to_string()),
            status: if priced { ItemStatus::Priced } else { ItemStatus::NoData },
            attempts: Vec::new(),
        };
        let total = if priced { 8100.0 } else { 0.0 };
        MarketResult {
            items: vec![item],
            breakdown: CostBreakdown {
                food_cost: total / 1.8,
                labor_cost: 0.0,
                operational_cost: 0.0,
                overhead: 0.0,
                profit_margin: 0.0,
            },
            total_cost: total,
            comparison: Some(BudgetComparison {
                budget: 2_000_000.0,
                difference: 0.0,
                margin_percentage: 0.0,
                risk_level: risk,
                recommendation: String::new(),
            }),
            forecast: Forecast {
                current_month: total,
                next_month: total,
                next_quarter: total,
                seasonal_factor: 1.05,
            },
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_complete_tender_scores_full_marks() {
        let market = market(true, BudgetRisk::Safe);
        let validation = validate(&complete_fields(), None, Some(&market), &[]);
        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
        assert_eq!(validation.data_quality_score, 100);

        let decision = decide(&validation, None, Some(&market), 0);
        assert_eq!(decision.recommendation, Recommendation::Participate);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_gaps_lower_the_score() {
        let market = market(false, BudgetRisk::Safe);
        let validation = validate(
            &ExtractedFields::default(),
            None,
            Some(&market),
            &[AnalysisStage::Contextual],
        );
        // 6 missing fields, missing tender date (high), nothing priced
        // (high), degraded stage (medium), one no-data warning
        assert_eq!(validation.data_quality_score, 100 - 60 - 10 - 10 - 5 - 2);
        assert!(validation.is_valid);
        assert_eq!(validation.warnings.len(), 1);

        let decision = decide(&validation, None, Some(&market), 1);
        assert_eq!(decision.recommendation, Recommendation::ParticipateWithCaution);
        assert_eq!(decision.confidence, 0.11);
    }

    #[test]
    fn test_date_and_range_checks() {
        let mut fields = complete_fields();
        fields.contract_start = NaiveDate::from_ymd_opt(2026, 2, 1);
        fields.person_count = Some(5);
        fields.day_count = Some(1000);
        let validation = validate(&fields, None, None, &[]);
        assert_eq!(validation.errors.len(), 1);
        assert_eq!(validation.errors[0].field, "contract_start");
        assert_eq!(validation.warnings.len(), 2);
        assert_eq!(validation.data_quality_score, 86);
    }

    #[test]
    fn test_risky_budget_declines() {
        let market = market(true, BudgetRisk::Risky);
        let validation = validate(&complete_fields(), None, Some(&market), &[]);
        let decision = decide(&validation, None, Some(&market), 0);
        assert_eq!(decision.recommendation, Recommendation::Decline);
    }

    #[test]
    fn test_labor_mismatch_and_high_risk_warnings() {
        let mut contextual = ContextualResult::fallback();
        contextual.operational_risk.level = RiskLevel::High;
        contextual.staffing.estimated_headcount = 5;
        let mut market = market(true, BudgetRisk::Safe);
        market.breakdown.labor_cost = 1000.0;

        let validation = validate(&complete_fields(), Some(&contextual), Some(&market), &[]);
        let fields: Vec<&str> = validation.warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["contextual.operational_risk", "market.breakdown.labor_cost"]
        );

        let decision = decide(&validation, Some(&contextual), Some(&market), 0);
        assert_eq!(decision.recommendation, Recommendation::ParticipateWithCaution);
    }
}
