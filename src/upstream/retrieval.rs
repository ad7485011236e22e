//! Retrieval statistics client.

use super::{ensure_success, RetrievalStatsLookup};
use crate::error::UpstreamError;
use crate::models::ProviderSuccessRate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct MinerSuccessRate {
    miner_id: String,
    #[serde(default)]
    success_rate: Option<f64>,
}

/// Retrieval statistics API client.
pub struct RetrievalStatsClient {
    http: reqwest::Client,
    base_url: String,
}

impl RetrievalStatsClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RetrievalStatsLookup for RetrievalStatsClient {
    async fn success_rates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderSuccessRate>, UpstreamError> {
        let url = format!(
            "{}/miners/retrieval-success-rate/summary",
            self.base_url.trim_end_matches('/')
        );
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        debug!("Fetching retrieval success rates {} .. {}", from, to);

        let response = self
            .http
            .get(&url)
            .query(&[("from", from.as_str()), ("to", to.as_str())])
            .send()
            .await?;
        let rows: Vec<MinerSuccessRate> = ensure_success(response).await?.json().await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                r.success_rate.map(|rate| ProviderSuccessRate {
                    provider_id: r.miner_id,
                    success_rate: rate.clamp(0.0, 1.0),
                })
            })
            .collect())
    }
}
