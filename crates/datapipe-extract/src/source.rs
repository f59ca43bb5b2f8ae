//! Record sources
//!
//! The extractor reads one JSON array from a source per run. No pagination:
//! the whole record set comes back from a single GET.

use std::time::Duration;

use async_trait::async_trait;
use datapipe_config::SourceConfig;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

use crate::error::{ExtractError, Result};

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the complete record set
    async fn fetch(&self) -> Result<Vec<Value>>;

    /// Human-readable origin, used in logs
    fn describe(&self) -> String;
}

/// Unauthenticated HTTP GET returning a JSON array
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("datapipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtractError::invalid_config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.timeout())
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<Value>> {
        debug!(url = %self.url, "GET");

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ExtractError::source_request(&self.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::source_status(&self.url, status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ExtractError::invalid_payload(format!("response is not JSON: {}", e)))?;

        match body {
            Value::Array(items) => Ok(items),
            _ => Err(ExtractError::invalid_payload(
                "expected a JSON array at the top level",
            )),
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
