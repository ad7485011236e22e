//! Distribution aggregation.
//!
//! Fetches the provider, replica and CID sharing datasets for a client
//! group, normalizes them into shares of the group's total and enriches
//! them with provider locations and the applications of other clients.
//! Each dataset is fetched with its own retry budget and falls back to an
//! empty result on failure.

use crate::error::UpstreamError;
use crate::models::{
    CidSharing, GeoResult, Location, ProviderDistribution, RawCidSharingRow, RawProviderRow,
    RawReplicaRow, ReplicaDistribution,
};
use crate::resolver::ApplicationInfoResolver;
use crate::retry::{retry, RetryPolicy};
use crate::upstream::{DistributionSource, GeoLookup, ProviderInfoLookup, TicketSystem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Network genesis, unix seconds.
pub const GENESIS_TIMESTAMP: i64 = 1_598_306_400;

/// Seconds per chain epoch.
pub const EPOCH_DURATION_SECONDS: i64 = 30;

/// Chain epoch at `now`.
pub fn current_epoch(now: DateTime<Utc>) -> i64 {
    (now.timestamp() - GENESIS_TIMESTAMP).div_euclid(EPOCH_DURATION_SECONDS)
}

/// Parse a decimal byte count; malformed values count as zero.
pub fn parse_decimal(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            warn!("Unparseable decimal value {:?}, treating as 0", value);
            0.0
        }
    }
}

/// All three datasets for one client group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Distributions {
    pub providers: Vec<ProviderDistribution>,
    pub replicas: Vec<ReplicaDistribution>,
    pub sharing: Vec<CidSharing>,
}

/// Turn raw provider rows into shares of the group total.
///
/// Returns an empty set when the group total is zero.
pub fn normalize_providers(rows: &[RawProviderRow], client_ids: &[String]) -> Vec<ProviderDistribution> {
    let sized: Vec<(&RawProviderRow, f64, f64)> = rows
        .iter()
        .map(|r| (r, parse_decimal(&r.total_deal_size), parse_decimal(&r.unique_data_size)))
        .collect();

    let sum: f64 = sized.iter().map(|(_, total, _)| total).sum();
    if sum <= 0.0 {
        return Vec::new();
    }

    sized
        .into_iter()
        .map(|(row, total, unique)| ProviderDistribution {
            provider: row.provider.clone(),
            total_deal_size: total,
            unique_data_size: unique,
            duplication_percentage: if total > 0.0 { (total - unique) / total } else { 0.0 },
            percentage_of_client_total: total / sum,
            location: None,
            is_new_provider: row
                .first_client
                .as_ref()
                .map(|first| client_ids.contains(first))
                .unwrap_or(false),
        })
        .collect()
}

/// Turn raw replica rows into shares of the group total.
pub fn normalize_replicas(rows: &[RawReplicaRow]) -> Vec<ReplicaDistribution> {
    let sized: Vec<(u32, f64, f64)> = rows
        .iter()
        .map(|r| {
            (
                r.num_of_replicas,
                parse_decimal(&r.total_deal_size),
                parse_decimal(&r.unique_data_size),
            )
        })
        .collect();

    let sum: f64 = sized.iter().map(|(_, total, _)| total).sum();
    if sum <= 0.0 {
        return Vec::new();
    }

    sized
        .into_iter()
        .map(|(replicas, total, unique)| ReplicaDistribution {
            number_of_replicas: replicas,
            total_deal_size: total,
            unique_data_size: unique,
            percentage_of_client_total: total / sum,
        })
        .collect()
}

/// Largest deals first, then grouped by operator name.
pub fn order_providers(providers: &mut [ProviderDistribution]) {
    providers.sort_by(|a, b| {
        b.total_deal_size
            .partial_cmp(&a.total_deal_size)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    providers.sort_by(|a, b| a.org_name().cmp(b.org_name()));
}

/// IP addresses found in text multiaddrs.
pub fn ips_from_multiaddrs(addrs: &[String]) -> Vec<IpAddr> {
    addrs
        .iter()
        .filter_map(|addr| {
            let mut parts = addr.split('/').filter(|p| !p.is_empty());
            match (parts.next(), parts.next()) {
                (Some("ip4"), Some(ip)) | (Some("ip6"), Some(ip)) => ip.parse().ok(),
                _ => None,
            }
        })
        .collect()
}

/// Locate a provider: network info, then each announced IP in turn until
/// one geolocates. Any failure along the way yields `None` for this provider.
pub async fn locate_provider(
    provider_info: &dyn ProviderInfoLookup,
    geo: &dyn GeoLookup,
    provider: &str,
) -> Option<Location> {
    let addrs = match provider_info.provider_network_info(provider).await {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("Network info for {} unavailable: {}", provider, e);
            return None;
        }
    };

    for ip in ips_from_multiaddrs(&addrs) {
        match geo.locate(ip).await {
            Ok(GeoResult::Located(location)) => return Some(location),
            Ok(GeoResult::Bogon) => debug!("{} announces bogon address {}", provider, ip),
            Err(e) => debug!("Geo lookup for {} ({}) failed: {}", provider, ip, e),
        }
    }

    None
}

/// Collects and normalizes distribution datasets.
pub struct DistributionAggregator {
    source: Arc<dyn DistributionSource>,
    provider_info: Arc<dyn ProviderInfoLookup>,
    geo: Arc<dyn GeoLookup>,
    resolver: Arc<ApplicationInfoResolver>,
    tickets: Arc<dyn TicketSystem>,
    retry: RetryPolicy,
}

impl DistributionAggregator {
    pub fn new(
        source: Arc<dyn DistributionSource>,
        provider_info: Arc<dyn ProviderInfoLookup>,
        geo: Arc<dyn GeoLookup>,
        resolver: Arc<ApplicationInfoResolver>,
        tickets: Arc<dyn TicketSystem>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            provider_info,
            geo,
            resolver,
            tickets,
            retry,
        }
    }

    /// Fetch all three datasets concurrently.
    pub async fn aggregate(&self, client_ids: &[String]) -> Distributions {
        let epoch = current_epoch(Utc::now());
        let (providers, replicas, sharing) = tokio::join!(
            self.providers(client_ids),
            self.replicas(client_ids, epoch),
            self.sharing(client_ids),
        );

        Distributions {
            providers,
            replicas,
            sharing,
        }
    }

    /// Provider distribution with locations, in presentation order.
    pub async fn providers(&self, client_ids: &[String]) -> Vec<ProviderDistribution> {
        let rows = self
            .fetch_or_empty("provider distribution", || {
                self.source.provider_distribution(client_ids)
            })
            .await;

        let mut providers = normalize_providers(&rows, client_ids);
        if providers.is_empty() {
            info!("No active deals for client group {:?}", client_ids);
            return providers;
        }

        for provider in providers.iter_mut() {
            provider.location =
                locate_provider(self.provider_info.as_ref(), self.geo.as_ref(), &provider.provider)
                    .await;
        }

        order_providers(&mut providers);
        info!("Aggregated {} providers", providers.len());
        providers
    }

    /// Replica distribution for deals active at `epoch`.
    pub async fn replicas(&self, client_ids: &[String], epoch: i64) -> Vec<ReplicaDistribution> {
        let rows = self
            .fetch_or_empty("replica distribution", || {
                self.source.replica_distribution(client_ids, epoch)
            })
            .await;

        normalize_replicas(&rows)
    }

    /// Other clients sharing content with this group, with their applications.
    pub async fn sharing(&self, client_ids: &[String]) -> Vec<CidSharing> {
        let rows: Vec<RawCidSharingRow> = self
            .fetch_or_empty("cid sharing", || self.source.cid_sharing(client_ids))
            .await;

        let mut sharing = Vec::with_capacity(rows.len());
        for row in rows {
            let other_application = match self.resolver.resolve(&row.other_client_address).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        "Could not resolve sharing client {}: {}",
                        row.other_client_address, e
                    );
                    None
                }
            };

            let approvers = match other_application
                .as_ref()
                .and_then(|a| a.issue_reference.as_deref())
            {
                Some(issue) => self.approvers(issue).await,
                None => None,
            };

            sharing.push(CidSharing {
                other_client_address: row.other_client_address,
                total_deal_size: parse_decimal(&row.total_deal_size),
                unique_cid_count: row.unique_cid_count,
                other_application,
                approvers,
            });
        }

        sharing
    }

    async fn approvers(&self, issue: &str) -> Option<Vec<String>> {
        match retry(self.retry, "approver lookup", || self.tickets.approvers(issue)).await {
            Ok(approvers) => Some(approvers),
            Err(e) => {
                warn!("Could not read approvers of {}: {}", issue, e);
                None
            }
        }
    }

    async fn fetch_or_empty<T, F, Fut>(&self, label: &str, op: F) -> Vec<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<T>, UpstreamError>>,
    {
        match retry(self.retry, label, op).await {
            Ok(rows) => {
                debug!("Fetched {} {} rows", rows.len(), label);
                rows
            }
            Err(e) => {
                warn!("Giving up on {}, continuing without it: {}", label, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::models::RawApplicationRecord;
    use crate::upstream::mock::{
        MockApplicationLookup, MockDistributionSource, MockGeo, MockProviderInfo, MockTickets,
    };
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        }
    }

    fn ids() -> Vec<String> {
        vec!["f0100".to_string()]
    }

    fn aggregator(
        source: MockDistributionSource,
        info: MockProviderInfo,
        geo: MockGeo,
        lookup: MockApplicationLookup,
        tickets: MockTickets,
    ) -> DistributionAggregator {
        let resolver = ApplicationInfoResolver::new(
            Arc::new(lookup),
            Arc::new(TtlCache::new(16, None)),
            fast_retry(),
        );
        DistributionAggregator::new(
            Arc::new(source),
            Arc::new(info),
            Arc::new(geo),
            Arc::new(resolver),
            Arc::new(tickets),
            fast_retry(),
        )
    }

    #[test]
    fn test_current_epoch() {
        let genesis = Utc.timestamp_opt(GENESIS_TIMESTAMP, 0).unwrap();
        assert_eq!(current_epoch(genesis), 0);
        let later = Utc.timestamp_opt(GENESIS_TIMESTAMP + 95, 0).unwrap();
        assert_eq!(current_epoch(later), 3);
    }

    #[test]
    fn test_provider_percentages_sum_to_one() {
        let rows: Vec<RawProviderRow> = [
            ("f01", "1099511627776", "1099511627776"),
            ("f02", "3298534883328", "2199023255552"),
            ("f03", "7", "7"),
            ("f04", "123456789012345678901234", "1"),
        ]
        .iter()
        .map(|(p, t, u)| RawProviderRow {
            provider: p.to_string(),
            total_deal_size: t.to_string(),
            unique_data_size: u.to_string(),
            first_client: None,
        })
        .collect();

        let providers = normalize_providers(&rows, &ids());
        let sum: f64 = providers.iter().map(|p| p.percentage_of_client_total).sum();
        assert!((sum - 1.0).abs() < 1e-6);

        let f02 = providers.iter().find(|p| p.provider == "f02").unwrap();
        assert!((f02.duplication_percentage - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_yields_no_providers() {
        let rows = vec![RawProviderRow {
            provider: "f01".to_string(),
            total_deal_size: "0".to_string(),
            unique_data_size: "0".to_string(),
            first_client: None,
        }];
        assert!(normalize_providers(&rows, &ids()).is_empty());
        assert!(normalize_providers(&[], &ids()).is_empty());
    }

    #[test]
    fn test_new_provider_flag() {
        let rows = vec![
            RawProviderRow {
                provider: "f01".to_string(),
                total_deal_size: "10".to_string(),
                unique_data_size: "10".to_string(),
                first_client: Some("f0100".to_string()),
            },
            RawProviderRow {
                provider: "f02".to_string(),
                total_deal_size: "10".to_string(),
                unique_data_size: "10".to_string(),
                first_client: Some("f0999".to_string()),
            },
        ];
        let providers = normalize_providers(&rows, &ids());
        assert!(providers[0].is_new_provider);
        assert!(!providers[1].is_new_provider);
    }

    #[test]
    fn test_replica_percentages() {
        let rows = vec![
            RawReplicaRow {
                num_of_replicas: 1,
                total_deal_size: "30".to_string(),
                unique_data_size: "30".to_string(),
            },
            RawReplicaRow {
                num_of_replicas: 5,
                total_deal_size: "70".to_string(),
                unique_data_size: "14".to_string(),
            },
        ];
        let replicas = normalize_replicas(&rows);
        assert!((replicas[0].percentage_of_client_total - 0.3).abs() < 1e-9);
        assert!((replicas[1].percentage_of_client_total - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_ips_from_multiaddrs() {
        let addrs = vec![
            "/ip4/1.2.3.4/tcp/24001".to_string(),
            "/dns4/example.com/tcp/80".to_string(),
            "/ip6/::1/tcp/1".to_string(),
            "garbage".to_string(),
        ];
        let ips = ips_from_multiaddrs(&addrs);
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0].to_string(), "1.2.3.4");
    }

    #[test]
    fn test_order_providers_groups_by_org() {
        let make = |id: &str, size: f64, org: &str| ProviderDistribution {
            provider: id.to_string(),
            total_deal_size: size,
            unique_data_size: size,
            duplication_percentage: 0.0,
            percentage_of_client_total: 0.0,
            location: Some(Location {
                org_name: Some(org.to_string()),
                ..Default::default()
            }),
            is_new_provider: false,
        };
        let mut providers = vec![
            make("f01", 10.0, "Zeta"),
            make("f02", 50.0, "Alpha"),
            make("f03", 90.0, "Zeta"),
            make("f04", 20.0, "Alpha"),
        ];
        order_providers(&mut providers);
        let order: Vec<_> = providers.iter().map(|p| p.provider.as_str()).collect();
        assert_eq!(order, vec!["f02", "f04", "f03", "f01"]);
    }

    #[tokio::test]
    async fn test_locate_short_circuits_on_first_location() {
        let info = MockProviderInfo::default().with(
            "f01",
            &["/ip4/10.0.0.1/tcp/1", "/ip4/8.8.8.8/tcp/1", "/ip4/9.9.9.9/tcp/1"],
        );
        let geo = MockGeo::default()
            .bogon("10.0.0.1")
            .located("8.8.8.8", "Mountain View", "California", "US", "AS15169 Google")
            .located("9.9.9.9", "Zurich", "Zurich", "CH", "AS19281 Quad9");

        let location = locate_provider(&info, &geo, "f01").await.unwrap();
        assert_eq!(location.country, "US");
        assert_eq!(geo.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_location_is_localized() {
        let source = MockDistributionSource::default()
            .provider("f01", "100", "100", None)
            .provider("f02", "100", "50", None);
        let info = MockProviderInfo::default()
            .with("f01", &["/ip4/8.8.8.8/tcp/1"])
            .failing("f02");
        let geo = MockGeo::default().located("8.8.8.8", "Mountain View", "California", "US", "AS1");

        let agg = aggregator(
            source,
            info,
            geo,
            MockApplicationLookup::default(),
            MockTickets::default(),
        );
        let providers = agg.providers(&ids()).await;

        assert_eq!(providers.len(), 2);
        let f01 = providers.iter().find(|p| p.provider == "f01").unwrap();
        let f02 = providers.iter().find(|p| p.provider == "f02").unwrap();
        assert_eq!(f01.rendered_location(), "Mountain View, California, US");
        assert_eq!(f02.rendered_location(), "Unknown");
    }

    #[tokio::test]
    async fn test_one_failing_dataset_does_not_block_others() {
        let source = MockDistributionSource {
            fail_providers: true,
            ..MockDistributionSource::default()
                .replica(1, "10", "10")
                .sharing("f1other", "5", 2)
        };
        let source = Arc::new(source);
        let resolver = ApplicationInfoResolver::new(
            Arc::new(MockApplicationLookup::default()),
            Arc::new(TtlCache::new(16, None)),
            fast_retry(),
        );
        let agg = DistributionAggregator::new(
            source.clone(),
            Arc::new(MockProviderInfo::default()),
            Arc::new(MockGeo::default()),
            Arc::new(resolver),
            Arc::new(MockTickets::default()),
            fast_retry(),
        );

        let result = agg.aggregate(&ids()).await;

        assert!(result.providers.is_empty());
        assert_eq!(result.replicas.len(), 1);
        assert_eq!(result.sharing.len(), 1);
        assert_eq!(source.provider_calls.load(Ordering::SeqCst), 2);
        assert!(source.last_epoch.lock().unwrap().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_sharing_resolves_other_clients() {
        let source = MockDistributionSource::default()
            .sharing("f1known", "100", 3)
            .sharing("f1unknown", "50", 1);
        let lookup = MockApplicationLookup::default().with(RawApplicationRecord {
            address: "f1known".to_string(),
            name: "Known Org".to_string(),
            verifier: "Notary".to_string(),
            issue_reference: Some("#9".to_string()),
            initial_allowance: "100".to_string(),
            allocation_count: 1,
        });
        let tickets = MockTickets::default()
            .with_comment("#9", "notary-a", "## Request Approved\nok")
            .with_comment("#9", "notary-b", "## Request Proposed\nok");

        let agg = aggregator(source, MockProviderInfo::default(), MockGeo::default(), lookup, tickets);
        let sharing = agg.sharing(&ids()).await;

        assert_eq!(sharing.len(), 2);
        assert_eq!(sharing[0].other_client_address, "f1known");
        assert_eq!(sharing[0].rendered_organization(), "Known Org");
        assert_eq!(sharing[0].rendered_approvers(), "notary-a, notary-b");
        assert_eq!(sharing[1].rendered_organization(), "Unknown");
        assert_eq!(sharing[1].rendered_approvers(), "Unknown");
    }
}
