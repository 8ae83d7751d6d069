//! TTL cache in front of a price source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;

use super::{PriceQuote, PriceSource, SourceError};

const MAX_CACHED_QUOTES: u64 = 10_000;

/// Caches successful quotes per product. Errors are never cached, so a
/// recovering source is retried on the next lookup.
pub struct CachedPriceSource {
    inner: Arc<dyn PriceSource>,
    quotes: Cache<String, PriceQuote>,
}

impl CachedPriceSource {
    pub fn new(inner: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self {
            inner,
            quotes: Cache::builder()
                .max_capacity(MAX_CACHED_QUOTES)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn cached(&self, product: &str) -> Option<PriceQuote> {
        self.quotes.get(&product.to_lowercase())
    }
}

#[async_trait]
impl PriceSource for CachedPriceSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn quote(&self, product: &str) -> Result<PriceQuote, SourceError> {
        let key = product.to_lowercase();
        if let Some(quote) = self.quotes.get(&key) {
            log::debug!("Quote cache hit for '{}' from {}", product, self.inner.name());
            return Ok(quote);
        }
        let quote = self.inner.quote(product).await?;
        self.quotes.insert(key, quote.clone());
        Ok(quote)
    }
}
