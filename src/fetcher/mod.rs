pub mod http_client;

use crate::config::{ApiKey, SourceConfig};
use crate::models::{Observation, ObservationWindow, ObservationsResponse, SortOrder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};
use url::Url;

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable observation source.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch(&self, window: &ObservationWindow) -> Result<Vec<Observation>>;
}

// ── Window ────────────────────────────────────────────────────────────────────

/// Trailing window ending on the run date: `[run_date - days, run_date]`,
/// most recent first, capped at `limit` rows.
pub fn observation_window(
    series_id: &str,
    run_timestamp: NaiveDateTime,
    window_days: i64,
    limit: u32,
) -> ObservationWindow {
    let end_date = run_timestamp.date();
    ObservationWindow {
        series_id: series_id.to_string(),
        start_date: end_date - Duration::days(window_days),
        end_date,
        sort_order: SortOrder::Desc,
        limit,
    }
}

/// Full request URL for a window. Contains the API key.
pub fn observations_url(base_url: &str, api_key: &ApiKey, window: &ObservationWindow) -> Result<Url> {
    let start = window.start_date.format("%Y-%m-%d").to_string();
    let end = window.end_date.format("%Y-%m-%d").to_string();
    let limit = window.limit.to_string();

    Url::parse_with_params(
        base_url,
        &[
            ("series_id", window.series_id.as_str()),
            ("api_key", api_key.expose()),
            ("file_type", "json"),
            ("observation_start", start.as_str()),
            ("observation_end", end.as_str()),
            ("sort_order", window.sort_order.as_str()),
            ("limit", limit.as_str()),
        ],
    )
    .with_context(|| format!("Invalid base URL {:?}", base_url))
}

// ── FRED client ───────────────────────────────────────────────────────────────

pub struct FredClient {
    client: HttpClient,
    base_url: String,
    api_key: ApiKey,
}

impl FredClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ObservationSource for FredClient {
    async fn fetch(&self, window: &ObservationWindow) -> Result<Vec<Observation>> {
        let url = observations_url(&self.base_url, &self.api_key, window)?;
        info!("Fetching observations: {}", window);

        let body: ObservationsResponse = self
            .client
            .get_json(url)
            .await
            .with_context(|| format!("Observations request failed for {}", window.series_id))?;

        debug!("{}: {} raw observations", window.series_id, body.observations.len());
        Ok(body.observations)
    }
}
