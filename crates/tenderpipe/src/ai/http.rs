use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::{ContextualModel, ContextualRequest, ModelError};

/// Remote model reached by `POST {endpoint}` with the request as JSON. The
/// response body is handed to the pipeline as-is.
pub struct HttpModel {
    name: String,
    endpoint: String,
    client: Client,
}

impl HttpModel {
    pub fn new(name: impl Into<String>, endpoint: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl ContextualModel for HttpModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, request: &ContextualRequest) -> Result<Value, ModelError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => {
                log::warn!("Model {} answered {}", self.name, status);
                Err(ModelError::UnexpectedStatus(status.as_u16()))
            }
        }
    }
}
