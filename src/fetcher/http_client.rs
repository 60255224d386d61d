use crate::config::SourceConfig;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Thin wrapper over `reqwest::Client`: one GET, one status check, one decode.
///
/// Retries are deliberately absent; a failed request fails the run.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }

    /// GET `url` and decode the JSON body. The URL may carry secrets, so it is
    /// stripped from transport errors and never logged with its query.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}{}", url.origin().ascii_serialization(), url.path());

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Request error: {}", e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error {}", status);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read response body: {}", e.without_url()))?;

        serde_json::from_str(&body).context("Failed to decode JSON body")
    }
}
