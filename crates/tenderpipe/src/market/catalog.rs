//! Built-in reference price table.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{PriceQuote, PriceSource, SourceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodCategory {
    Meat,
    Grain,
    Legume,
    Vegetable,
    Oil,
    Dairy,
    Other,
}

impl FoodCategory {
    /// Grams per person per meal.
    pub fn portion_grams(&self) -> f64 {
        match self {
            FoodCategory::Meat => 120.0,
            FoodCategory::Grain => 80.0,
            FoodCategory::Legume => 60.0,
            FoodCategory::Vegetable => 150.0,
            FoodCategory::Oil => 20.0,
            FoodCategory::Dairy => 200.0,
            FoodCategory::Other => 50.0,
        }
    }
}

/// (product, price per kg, category)
const PRICE_TABLE: &[(&str, f64, FoodCategory)] = &[
    ("chicken", 95.0, FoodCategory::Meat),
    ("red meat", 450.0, FoodCategory::Meat),
    ("beef", 480.0, FoodCategory::Meat),
    ("lamb", 520.0, FoodCategory::Meat),
    ("fish", 180.0, FoodCategory::Meat),
    ("rice", 45.0, FoodCategory::Grain),
    ("bulgur", 28.0, FoodCategory::Grain),
    ("pasta", 25.0, FoodCategory::Grain),
    ("bread", 10.0, FoodCategory::Grain),
    ("flour", 22.0, FoodCategory::Grain),
    ("lentil", 38.0, FoodCategory::Legume),
    ("chickpea", 42.0, FoodCategory::Legume),
    ("bean", 48.0, FoodCategory::Legume),
    ("tomato paste", 65.0, FoodCategory::Other),
    ("tomato", 25.0, FoodCategory::Vegetable),
    ("cucumber", 20.0, FoodCategory::Vegetable),
    ("pepper", 35.0, FoodCategory::Vegetable),
    ("eggplant", 30.0, FoodCategory::Vegetable),
    ("onion", 15.0, FoodCategory::Vegetable),
    ("potato", 12.0, FoodCategory::Vegetable),
    ("carrot", 18.0, FoodCategory::Vegetable),
    ("olive oil", 240.0, FoodCategory::Oil),
    ("sunflower oil", 85.0, FoodCategory::Oil),
    ("butter", 350.0, FoodCategory::Oil),
    ("white cheese", 120.0, FoodCategory::Dairy),
    ("cheddar", 180.0, FoodCategory::Dairy),
    ("milk", 28.0, FoodCategory::Dairy),
    ("yogurt", 32.0, FoodCategory::Dairy),
    ("egg", 3.5, FoodCategory::Other),
    ("sugar", 28.0, FoodCategory::Other),
    ("salt", 8.0, FoodCategory::Other),
];

const ALIASES: &[(&str, &str)] = &[
    ("chicken breast", "chicken"),
    ("chicken thigh", "chicken"),
    ("chicken meat", "chicken"),
    ("minced beef", "beef"),
    ("ground beef", "beef"),
    ("mince", "red meat"),
    ("diced lamb", "lamb"),
    ("wheat flour", "flour"),
    ("eggs", "egg"),
];

/// Lowercases, trims and maps known variants to their catalog name.
pub fn normalize_product(name: &str) -> String {
    let normalized = name.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(normalized)
}

/// Longest catalog key contained in `product`, so "tomato paste" wins over
/// "tomato".
fn lookup(product: &str) -> Option<&'static (&'static str, f64, FoodCategory)> {
    PRICE_TABLE
        .iter()
        .filter(|(key, _, _)| product.contains(key))
        .max_by_key(|(key, _, _)| key.len())
}

pub fn categorize(product: &str) -> FoodCategory {
    lookup(&normalize_product(product)).map_or(FoodCategory::Other, |(_, _, c)| *c)
}

/// Catalog product names, for keyword scans over free text.
pub fn known_products() -> impl Iterator<Item = &'static str> {
    PRICE_TABLE.iter().map(|(key, _, _)| *key)
}

/// Static reference prices. Unknown products yield [`SourceError::NoData`].
pub struct CatalogPriceSource {
    name: String,
    currency: String,
}

impl CatalogPriceSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            currency: "TRY".to_string(),
        }
    }
}

#[async_trait]
impl PriceSource for CatalogPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, product: &str) -> Result<PriceQuote, SourceError> {
        let normalized = normalize_product(product);
        let (key, price, _) =
            lookup(&normalized).ok_or_else(|| SourceError::NoData(product.to_string()))?;
        Ok(PriceQuote {
            product: (*key).to_string(),
            unit_price: *price,
            currency: self.currency.clone(),
            observed_at: Utc::now(),
        })
    }
}
