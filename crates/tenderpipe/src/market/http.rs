use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{PriceQuote, PriceSource, SourceError};

#[derive(Debug, Deserialize)]
struct QuoteBody {
    #[serde(alias = "price")]
    unit_price: f64,
    #[serde(default)]
    currency: Option<String>,
}

/// Remote price service answering `GET {base_url}/prices?product=...`
/// with `{"unit_price": f64, "currency": "..."}`. A 404 means the service
/// does not carry the product.
pub struct HttpPriceSource {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpPriceSource {
    pub fn new(name: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, product: &str) -> Result<PriceQuote, SourceError> {
        let url = format!("{}/prices", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("product", product)])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: QuoteBody = response.json().await?;
                if !body.unit_price.is_finite() || body.unit_price < 0.0 {
                    return Err(SourceError::Malformed(format!(
                        "price {} for '{}'",
                        body.unit_price, product
                    )));
                }
                Ok(PriceQuote {
                    product: product.to_string(),
                    unit_price: body.unit_price,
                    currency: body.currency.unwrap_or_else(|| "TRY".to_string()),
                    observed_at: Utc::now(),
                })
            }
            StatusCode::NOT_FOUND => Err(SourceError::NoData(product.to_string())),
            status => Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            }),
        }
    }
}
