//! Prices each line item through the configured sources and aggregates the
//! cost picture against the tender budget.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use serde_json::json;

use crate::health::HealthMonitor;
use crate::jobs::ProgressReporter;
use crate::market::catalog::known_products;
use crate::market::{categorize, normalize_product, CachedPriceSource, FoodCategory, PriceQuote, PriceSource};
use crate::pipeline::data_pool::{DataPool, Table};
use crate::pipeline::error::StageFailure;
use crate::pipeline::results::{
    AttemptOutcome, BudgetComparison, BudgetRisk, CostBreakdown, CostItem, ExtractedFields, Forecast,
    ItemStatus, MarketResult, SourceAttempt,
};
use crate::pipeline::AnalysisStage;

use super::{round1, round2};

const DEFAULT_PERSONS: f64 = 1000.0;
const DEFAULT_MEALS: f64 = 3.0;
const DEFAULT_DAYS: f64 = 365.0;

const LABOR_SHARE: f64 = 0.35;
const OPERATIONAL_SHARE: f64 = 0.20;
const OVERHEAD_SHARE: f64 = 0.15;
const PROFIT_SHARE: f64 = 0.10;

const MONTHLY_INFLATION: f64 = 0.03;
const SEASONAL_FACTOR: f64 = 1.05;
const HIGH_COST_ITEM: f64 = 1_000_000.0;

const MENU_HEADER_KEYWORDS: &[&str] = &["menu", "meal", "dish", "ingredient", "portion"];
const NAME_HEADER_KEYWORDS: &[&str] = &["ingredient", "dish", "item", "product", "meal", "menu"];
const PORTION_HEADER_KEYWORDS: &[&str] = &["portion", "gram"];

/// Progress window of the market stage.
const PROGRESS_FROM: u8 = 50;
const PROGRESS_SPAN: usize = 24;

#[derive(Debug, Clone, Copy)]
pub struct MarketSettings {
    pub fan_out: usize,
    pub source_timeout: Duration,
}

/// An item to price, before any source was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub name: String,
    pub product: String,
    pub category: FoodCategory,
    pub portion_grams: Option<f64>,
}

impl PlannedItem {
    fn new(name: &str, category: Option<FoodCategory>, portion_grams: Option<f64>) -> Self {
        Self {
            name: name.trim().to_string(),
            product: normalize_product(name),
            category: category.unwrap_or_else(|| categorize(name)),
            portion_grams: portion_grams.filter(|g| g.is_finite() && *g > 0.0),
        }
    }
}

// ─── Item planning ──────────────────────────────────────────────────────────

fn header_matches(header: &str, keywords: &[&str]) -> bool {
    let lower = header.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

fn parse_grams(cell: &str) -> Option<f64> {
    let digits: String = cell
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

fn items_from_table(table: &Table) -> Vec<PlannedItem> {
    let name_col = table
        .headers
        .iter()
        .position(|h| header_matches(h, NAME_HEADER_KEYWORDS))
        .unwrap_or(0);
    let portion_col = table
        .headers
        .iter()
        .position(|h| header_matches(h, PORTION_HEADER_KEYWORDS));

    table
        .rows
        .iter()
        .filter_map(|row| {
            let name = row.get(name_col)?.trim();
            if name.is_empty() {
                return None;
            }
            let grams = portion_col.and_then(|c| row.get(c)).and_then(|cell| parse_grams(cell));
            Some(PlannedItem::new(name, None, grams))
        })
        .collect()
}

fn items_from_text(pool: &DataPool) -> Vec<PlannedItem> {
    let mut keys: Vec<&str> = known_products().collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));

    let mut found = Vec::new();
    for text in pool.texts() {
        // Longest names first; matched spans are blanked so "tomato paste"
        // does not also count as "tomato".
        let mut remaining = text.to_lowercase();
        for key in &keys {
            if remaining.contains(key) {
                found.push(PlannedItem::new(key, None, None));
                remaining = remaining.replace(key, " ");
            }
        }
    }
    found
}

/// Line items of a pool: explicit items, else menu tables, else catalog
/// products named in the text. Duplicates of a product are dropped.
pub fn plan_items(pool: &DataPool) -> Vec<PlannedItem> {
    let mut items: Vec<PlannedItem> = if !pool.line_items.is_empty() {
        pool.line_items
            .iter()
            .map(|i| PlannedItem::new(&i.name, i.category, i.portion_grams))
            .collect()
    } else {
        pool.tables
            .iter()
            .filter(|t| t.headers.iter().any(|h| header_matches(h, MENU_HEADER_KEYWORDS)))
            .flat_map(items_from_table)
            .collect()
    };
    if items.is_empty() {
        items = items_from_text(pool);
    }

    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.product.clone()));
    items
}

// ─── Pricing ────────────────────────────────────────────────────────────────

struct Priced {
    quote: Option<(PriceQuote, String)>,
    attempts: Vec<SourceAttempt>,
}

fn attempt(source: &str, outcome: AttemptOutcome, detail: Option<String>) -> SourceAttempt {
    SourceAttempt {
        source: source.to_string(),
        outcome,
        detail,
    }
}

/// Asks each source in order until one prices the product. Every external
/// call is gated by and reported to the health monitor.
async fn price_item(
    product: &str,
    sources: &[CachedPriceSource],
    health: &HealthMonitor,
    timeout: Duration,
) -> Priced {
    let mut attempts = Vec::with_capacity(sources.len());

    for source in sources {
        let name = source.name();
        if let Some(quote) = source.cached(product) {
            attempts.push(attempt(name, AttemptOutcome::Priced, Some("cached".to_string())));
            return Priced {
                quote: Some((quote, name.to_string())),
                attempts,
            };
        }

        if !health.is_healthy(name) {
            attempts.push(attempt(name, AttemptOutcome::SkippedUnhealthy, None));
            continue;
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, source.quote(product)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(quote)) => {
                health.record_success(name, latency_ms);
                attempts.push(attempt(name, AttemptOutcome::Priced, None));
                return Priced {
                    quote: Some((quote, name.to_string())),
                    attempts,
                };
            }
            Ok(Err(e)) if !e.is_fault() => {
                health.record_success(name, latency_ms);
                attempts.push(attempt(name, AttemptOutcome::NoData, None));
            }
            Ok(Err(e)) => {
                health.record_failure(name, &e.to_string());
                attempts.push(attempt(name, AttemptOutcome::Failed, Some(e.to_string())));
            }
            Err(_) => {
                let reason = format!("Timed out after {} ms", timeout.as_millis());
                health.record_failure(name, &reason);
                attempts.push(attempt(name, AttemptOutcome::Failed, Some(reason)));
            }
        }
    }

    Priced {
        quote: None,
        attempts,
    }
}

fn cost_item(item: PlannedItem, priced: Priced, fields: &ExtractedFields) -> CostItem {
    let persons = fields.person_count.map_or(DEFAULT_PERSONS, f64::from);
    let meals = fields.meals_per_day.map_or(DEFAULT_MEALS, f64::from);
    let days = fields.day_count.map_or(DEFAULT_DAYS, f64::from);
    let grams = item
        .portion_grams
        .unwrap_or_else(|| item.category.portion_grams());
    let quantity_kg = round2(grams * persons * meals * days / 1000.0);

    match priced.quote {
        Some((quote, source)) => CostItem {
            name: item.name,
            product: item.product,
            category: item.category,
            quantity_kg,
            unit_price: Some(quote.unit_price),
            total_price: round2(quote.unit_price * quantity_kg),
            source: Some(source),
            status: ItemStatus::Priced,
            attempts: priced.attempts,
        },
        None => CostItem {
            name: item.name,
            product: item.product,
            category: item.category,
            quantity_kg,
            unit_price: None,
            total_price: 0.0,
            source: None,
            status: ItemStatus::NoData,
            attempts: priced.attempts,
        },
    }
}

// ─── Aggregation ────────────────────────────────────────────────────────────

fn compare_with_budget(total_cost: f64, budget: Option<f64>) -> Option<BudgetComparison> {
    let budget = budget.filter(|b| *b > 0.0)?;
    let difference = round2(budget - total_cost);
    let margin = difference / budget * 100.0;
    let (risk_level, recommendation) = if margin > 20.0 {
        (BudgetRisk::Safe, "Budget is sufficient; a bid can be submitted with confidence")
    } else if margin > 5.0 {
        (BudgetRisk::Tight, "Budget is tight; optimise costs before bidding")
    } else {
        (BudgetRisk::Risky, "Budget is insufficient; analyse in detail before bidding")
    };
    Some(BudgetComparison {
        budget,
        difference,
        margin_percentage: round1(margin),
        risk_level,
        recommendation: recommendation.to_string(),
    })
}

pub fn aggregate(items: Vec<CostItem>, fields: &ExtractedFields) -> MarketResult {
    let food_cost = round2(items.iter().map(|i| i.total_price).sum());
    let breakdown = CostBreakdown {
        food_cost,
        labor_cost: (food_cost * LABOR_SHARE).round(),
        operational_cost: (food_cost * OPERATIONAL_SHARE).round(),
        overhead: (food_cost * OVERHEAD_SHARE).round(),
        profit_margin: (food_cost * PROFIT_SHARE).round(),
    };
    let total_cost = round2(
        breakdown.food_cost
            + breakdown.labor_cost
            + breakdown.operational_cost
            + breakdown.overhead
            + breakdown.profit_margin,
    );
    let comparison = compare_with_budget(total_cost, fields.estimated_budget);
    let forecast = Forecast {
        current_month: total_cost,
        next_month: (total_cost * (1.0 + MONTHLY_INFLATION)).round(),
        next_quarter: (total_cost * (1.0 + MONTHLY_INFLATION).powi(3) * SEASONAL_FACTOR).round(),
        seasonal_factor: SEASONAL_FACTOR,
    };

    let mut warnings = Vec::new();
    let expensive = items.iter().filter(|i| i.total_price > HIGH_COST_ITEM).count();
    if expensive > 0 {
        warnings.push(format!("{} item(s) cost more than 1,000,000", expensive));
    }
    let missing = items.iter().filter(|i| i.status == ItemStatus::NoData).count();
    if missing > 0 {
        warnings.push(format!("{} item(s) have no price data", missing));
    }
    if comparison
        .as_ref()
        .is_some_and(|c| c.risk_level == BudgetRisk::Risky)
    {
        warnings.push("Calculated cost leaves no safe margin against the budget".to_string());
    }

    MarketResult {
        items,
        breakdown,
        total_cost,
        comparison,
        forecast,
        warnings,
    }
}

pub async fn analyze(
    sources: &[CachedPriceSource],
    health: &HealthMonitor,
    settings: MarketSettings,
    pool: &DataPool,
    fields: &ExtractedFields,
    progress: &dyn ProgressReporter,
) -> Result<MarketResult, StageFailure> {
    if sources.is_empty() {
        return Err(StageFailure::external("No price sources configured"));
    }

    let items = plan_items(pool);
    let total = items.len();
    let done = AtomicUsize::new(0);
    log::debug!("Pricing {} item(s) across {} source(s)", total, sources.len());

    let costed: Vec<CostItem> = stream::iter(items)
        .map(|item| {
            let done = &done;
            async move {
                let priced = price_item(&item.product, sources, health, settings.source_timeout).await;
                let name = item.name.clone();
                let cost = cost_item(item, priced, fields);
                let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                let percent = PROGRESS_FROM + (PROGRESS_SPAN * completed / total) as u8;
                progress.report(
                    AnalysisStage::Market.as_str(),
                    percent,
                    Some(json!({
                        "item": name,
                        "status": cost.status,
                        "completed": completed,
                        "total": total,
                    })),
                );
                cost
            }
        })
        .buffered(settings.fan_out.max(1))
        .collect()
        .await;

    Ok(aggregate(costed, fields))
}
