//! Retrievability aggregation.
//!
//! Joins network-wide retrieval success rates onto a client's providers and
//! computes the deal-size-weighted average. Retrieval statistics are
//! advisory: any upstream failure yields an empty summary.

use crate::models::{ProviderDistribution, ProviderSuccessRate, Retrievability, RetrievabilitySummary};
use crate::retry::{retry, RetryPolicy};
use crate::upstream::RetrievalStatsLookup;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RetrievabilityAggregator {
    stats: Arc<dyn RetrievalStatsLookup>,
    retry: RetryPolicy,
}

impl RetrievabilityAggregator {
    pub fn new(stats: Arc<dyn RetrievalStatsLookup>, retry: RetryPolicy) -> Self {
        Self { stats, retry }
    }

    /// Success rates for the trailing `window_days` ending at `now`.
    pub async fn fetch(&self, window_days: u32, now: DateTime<Utc>) -> Vec<ProviderSuccessRate> {
        let from = now - Duration::days(i64::from(window_days));
        match retry(self.retry, "retrieval stats", || self.stats.success_rates(from, now)).await {
            Ok(rates) => {
                debug!("Fetched {} retrieval success rates", rates.len());
                rates
            }
            Err(e) => {
                warn!("Retrieval stats unavailable, continuing without them: {}", e);
                Vec::new()
            }
        }
    }
}

/// Inner join of rates onto providers, weighted by total deal size.
pub fn summarize(providers: &[ProviderDistribution], rates: &[ProviderSuccessRate]) -> RetrievabilitySummary {
    let by_provider: HashMap<&str, f64> = rates
        .iter()
        .map(|r| (r.provider_id.as_str(), r.success_rate))
        .collect();

    let per_provider: Vec<Retrievability> = providers
        .iter()
        .filter_map(|p| {
            by_provider.get(p.provider.as_str()).map(|rate| Retrievability {
                provider_id: p.provider.clone(),
                success_rate: rate.clamp(0.0, 1.0),
                total_deal_size: p.total_deal_size,
            })
        })
        .collect();

    let weight: f64 = per_provider.iter().map(|r| r.total_deal_size).sum();
    if per_provider.is_empty() || weight <= 0.0 {
        return RetrievabilitySummary::default();
    }

    let weighted: f64 = per_provider
        .iter()
        .map(|r| r.success_rate * r.total_deal_size)
        .sum();

    RetrievabilitySummary {
        per_provider,
        weighted_average: weighted / weight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::MockRetrievalStats;
    use chrono::TimeZone;

    fn provider(id: &str, size: f64) -> ProviderDistribution {
        ProviderDistribution {
            provider: id.to_string(),
            total_deal_size: size,
            unique_data_size: size,
            duplication_percentage: 0.0,
            percentage_of_client_total: 0.0,
            location: None,
            is_new_provider: false,
        }
    }

    fn rate(id: &str, rate: f64) -> ProviderSuccessRate {
        ProviderSuccessRate {
            provider_id: id.to_string(),
            success_rate: rate,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            delay: std::time::Duration::from_millis(1),
        }
    }

    #[test]
    fn test_weighted_average() {
        let providers = vec![provider("A", 100.0), provider("B", 100.0)];
        let summary = summarize(&providers, &[rate("A", 0.1), rate("B", 0.9)]);
        assert!((summary.weighted_average - 0.5).abs() < 1e-9);
        assert_eq!(summary.per_provider.len(), 2);
    }

    #[test]
    fn test_inner_join_drops_unmatched() {
        let providers = vec![provider("A", 300.0), provider("B", 100.0)];
        let summary = summarize(&providers, &[rate("A", 0.4), rate("Z", 1.0)]);
        assert_eq!(summary.per_provider.len(), 1);
        assert_eq!(summary.success_rate_of("A"), Some(0.4));
        assert_eq!(summary.success_rate_of("B"), None);
        assert!((summary.weighted_average - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_join_is_zero() {
        let summary = summarize(&[provider("A", 100.0)], &[rate("B", 1.0)]);
        assert!(summary.per_provider.is_empty());
        assert_eq!(summary.weighted_average, 0.0);

        let zero_weight = summarize(&[provider("A", 0.0)], &[rate("A", 1.0)]);
        assert!(zero_weight.per_provider.is_empty());
        assert_eq!(zero_weight.weighted_average, 0.0);
    }

    #[tokio::test]
    async fn test_fetch_uses_trailing_window() {
        let stats = Arc::new(MockRetrievalStats::default().with("A", 0.5));
        let aggregator = RetrievabilityAggregator::new(stats.clone(), policy());
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap();

        let rates = aggregator.fetch(7, now).await;

        assert_eq!(rates.len(), 1);
        let (from, to) = stats.last_window.lock().unwrap().unwrap();
        assert_eq!(to, now);
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let stats = Arc::new(MockRetrievalStats::default().failing());
        let aggregator = RetrievabilityAggregator::new(stats.clone(), policy());

        let rates = aggregator.fetch(7, Utc::now()).await;
        let summary = summarize(&[provider("A", 100.0)], &rates);

        assert_eq!(summary, RetrievabilitySummary::default());
        assert_eq!(stats.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
