//! Derives the normalized field set from a data pool. Pure and synchronous.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;

use crate::pipeline::data_pool::DataPool;
use crate::pipeline::error::StageFailure;
use crate::pipeline::results::{ExtractedFields, SourcedStatement, TenderType};

const PENALTY_KEYWORDS: &[&str] = &["penalty", "delay", "compensation", "deduction", "sanction"];

static TENDER_TYPE_PATTERNS: LazyLock<Vec<(Regex, TenderType)>> = LazyLock::new(|| {
    [
        (r"(?i)service\s+procurement", TenderType::ServiceProcurement),
        (r"(?i)goods\s+procurement", TenderType::GoodsProcurement),
        (r"(?i)construction\s+works?", TenderType::Construction),
        (r"(?i)(meal|food)\s+service", TenderType::MealService),
        (r"(?i)catering", TenderType::Catering),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), kind))
    .collect()
});

static RE_SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

fn find_date(pool: &DataPool, kind: &str) -> Result<Option<NaiveDate>, StageFailure> {
    match pool.dates.iter().find(|d| d.kind == kind) {
        Some(mention) => parse_date(&mention.value).map(Some).ok_or_else(|| {
            StageFailure::fatal(format!("Unparseable {} '{}'", kind, mention.value))
        }),
        None => Ok(None),
    }
}

fn find_amount(pool: &DataPool, kind: &str) -> Option<f64> {
    pool.amounts.iter().find(|a| a.kind == kind).map(|a| a.value)
}

fn find_count(pool: &DataPool, kind: &str) -> Option<u32> {
    find_amount(pool, kind).map(|v| v.round().min(u32::MAX as f64) as u32)
}

fn find_entity(pool: &DataPool, kind: &str) -> Option<String> {
    pool.entities
        .iter()
        .find(|e| e.kind == kind)
        .map(|e| e.value.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn detect_tender_type(pool: &DataPool) -> Option<TenderType> {
    pool.texts().find_map(|text| {
        TENDER_TYPE_PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, kind)| *kind)
    })
}

fn mentions_penalty(text: &str) -> bool {
    let lower = text.to_lowercase();
    PENALTY_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn penalty_clauses(pool: &DataPool) -> Vec<SourcedStatement> {
    pool.text_blocks
        .iter()
        .filter(|block| mentions_penalty(&block.text))
        .flat_map(|block| {
            RE_SENTENCE_END
                .split(&block.text)
                .map(str::trim)
                .filter(|s| !s.is_empty() && mentions_penalty(s))
                .map(|sentence| SourcedStatement {
                    text: sentence.to_string(),
                    source_ref: vec![block.block_id.clone()],
                    confidence: 0.9,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn extract(pool: &DataPool) -> Result<ExtractedFields, StageFailure> {
    if !pool.has_content() {
        return Err(StageFailure::fatal("Data pool has no usable content"));
    }

    let fields = ExtractedFields {
        institution: find_entity(pool, "institution"),
        tender_id: find_entity(pool, "tender_id"),
        tender_date: find_date(pool, "tender_date")?,
        contract_start: find_date(pool, "contract_start")?,
        estimated_budget: find_amount(pool, "estimated_budget"),
        person_count: find_count(pool, "person_count"),
        day_count: find_count(pool, "day_count"),
        meals_per_day: find_count(pool, "meals_per_day"),
        tender_type: detect_tender_type(pool),
        penalty_clauses: penalty_clauses(pool),
    };

    log::debug!(
        "Extracted fields, missing: {:?}",
        fields.missing_required()
    );
    Ok(fields)
}
