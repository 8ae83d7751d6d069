//! Price sources consulted by the market stage.

pub mod cache;
pub mod catalog;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{PriceSourceConfig, PriceSourceKind};
use crate::error::ErrorKind;

pub use cache::CachedPriceSource;
pub use catalog::{categorize, normalize_product, CatalogPriceSource, FoodCategory};
pub use http::HttpPriceSource;

/// Unit price of one product, per kilogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub product: String,
    pub unit_price: f64,
    pub currency: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No price data for '{0}'")]
    NoData(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Malformed quote: {0}")]
    Malformed(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalSourceError
    }

    /// Whether the failure says something about the source's availability.
    /// A product the source does not carry is not a fault.
    pub fn is_fault(&self) -> bool {
        !matches!(self, SourceError::NoData(_))
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn quote(&self, product: &str) -> Result<PriceQuote, SourceError>;
}

/// Builds the configured sources in order, each behind a quote cache.
pub fn build_sources(
    configs: &[PriceSourceConfig],
    timeout: Duration,
    cache_ttl: Duration,
) -> Result<Vec<CachedPriceSource>, SourceError> {
    configs
        .iter()
        .map(|config| {
            let source: Arc<dyn PriceSource> = match config.kind {
                PriceSourceKind::Catalog => Arc::new(CatalogPriceSource::new(config.name.as_str())),
                PriceSourceKind::Http => {
                    let base_url = config.base_url.as_deref().ok_or_else(|| {
                        SourceError::Malformed(format!("source '{}' has no base_url", config.name))
                    })?;
                    Arc::new(HttpPriceSource::new(config.name.as_str(), base_url, timeout)?)
                }
            };
            Ok(CachedPriceSource::new(source, cache_ttl))
        })
        .collect()
}
