//! In-memory collaborators for tests.
//!
//! Each fake counts its calls so tests can assert on caching and retries.

use super::*;
use crate::models::{GeoResult, Location};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

fn unavailable(what: &str) -> UpstreamError {
    UpstreamError::Transport(format!("{} unavailable", what))
}

/// Address resolver with a fixed table.
#[derive(Default)]
pub struct MockAddressResolver {
    ids: HashMap<String, String>,
    pub calls: AtomicU32,
}

impl MockAddressResolver {
    pub fn with(mut self, address: &str, id: &str) -> Self {
        self.ids.insert(address.to_string(), id.to_string());
        self
    }
}

#[async_trait]
impl AddressResolver for MockAddressResolver {
    async fn resolve(&self, address: &str) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ids
            .get(address)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(address.to_string()))
    }
}

/// Registry with a fixed table; optionally fails the first N calls.
#[derive(Default)]
pub struct MockApplicationLookup {
    records: HashMap<String, Vec<RawApplicationRecord>>,
    failures_remaining: AtomicU32,
    pub calls: AtomicU32,
}

impl MockApplicationLookup {
    pub fn with(mut self, record: RawApplicationRecord) -> Self {
        self.records
            .entry(record.address.clone())
            .or_default()
            .push(record);
        self
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApplicationLookup for MockApplicationLookup {
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<RawApplicationRecord>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(unavailable("registry"));
        }
        Ok(self.records.get(address).cloned().unwrap_or_default())
    }
}

/// Provider multiaddrs; providers listed in `failing` error out.
#[derive(Default)]
pub struct MockProviderInfo {
    addrs: HashMap<String, Vec<String>>,
    failing: Vec<String>,
    pub calls: AtomicU32,
}

impl MockProviderInfo {
    pub fn with(mut self, provider: &str, addrs: &[&str]) -> Self {
        self.addrs.insert(
            provider.to_string(),
            addrs.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn failing(mut self, provider: &str) -> Self {
        self.failing.push(provider.to_string());
        self
    }
}

#[async_trait]
impl ProviderInfoLookup for MockProviderInfo {
    async fn provider_network_info(&self, provider_id: &str) -> Result<Vec<String>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|p| p == provider_id) {
            return Err(unavailable("chain node"));
        }
        Ok(self.addrs.get(provider_id).cloned().unwrap_or_default())
    }
}

/// Geo lookup keyed by IP; unknown IPs error out.
#[derive(Default)]
pub struct MockGeo {
    results: HashMap<IpAddr, GeoResult>,
    pub calls: AtomicU32,
}

impl MockGeo {
    pub fn located(mut self, ip: &str, city: &str, region: &str, country: &str, org: &str) -> Self {
        self.results.insert(
            ip.parse().expect("test ip"),
            GeoResult::Located(Location {
                city: city.to_string(),
                region: region.to_string(),
                country: country.to_string(),
                latitude: None,
                longitude: None,
                org_name: Some(org.to_string()),
            }),
        );
        self
    }

    pub fn bogon(mut self, ip: &str) -> Self {
        self.results.insert(ip.parse().expect("test ip"), GeoResult::Bogon);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoLookup for MockGeo {
    async fn locate(&self, ip: IpAddr) -> Result<GeoResult, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .get(&ip)
            .cloned()
            .ok_or_else(|| unavailable("geo"))
    }
}

/// Retrieval statistics, optionally always failing.
#[derive(Default)]
pub struct MockRetrievalStats {
    rates: Vec<ProviderSuccessRate>,
    fail: bool,
    pub calls: AtomicU32,
    pub last_window: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockRetrievalStats {
    pub fn with(mut self, provider: &str, rate: f64) -> Self {
        self.rates.push(ProviderSuccessRate {
            provider_id: provider.to_string(),
            success_rate: rate,
        });
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl RetrievalStatsLookup for MockRetrievalStats {
    async fn success_rates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderSuccessRate>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut window) = self.last_window.lock() {
            *window = Some((from, to));
        }
        if self.fail {
            return Err(unavailable("retrieval stats"));
        }
        Ok(self.rates.clone())
    }
}

/// Distribution tables held in memory.
#[derive(Default)]
pub struct MockDistributionSource {
    pub providers: Vec<RawProviderRow>,
    pub replicas: Vec<RawReplicaRow>,
    pub sharing: Vec<RawCidSharingRow>,
    pub fail_providers: bool,
    pub fail_replicas: bool,
    pub fail_sharing: bool,
    pub provider_calls: AtomicU32,
    pub replica_calls: AtomicU32,
    pub sharing_calls: AtomicU32,
    pub last_epoch: Mutex<Option<i64>>,
}

impl MockDistributionSource {
    pub fn provider(mut self, provider: &str, total: &str, unique: &str, first_client: Option<&str>) -> Self {
        self.providers.push(RawProviderRow {
            provider: provider.to_string(),
            total_deal_size: total.to_string(),
            unique_data_size: unique.to_string(),
            first_client: first_client.map(String::from),
        });
        self
    }

    pub fn replica(mut self, replicas: u32, total: &str, unique: &str) -> Self {
        self.replicas.push(RawReplicaRow {
            num_of_replicas: replicas,
            total_deal_size: total.to_string(),
            unique_data_size: unique.to_string(),
        });
        self
    }

    pub fn sharing(mut self, other: &str, total: &str, cids: u64) -> Self {
        self.sharing.push(RawCidSharingRow {
            other_client_address: other.to_string(),
            total_deal_size: total.to_string(),
            unique_cid_count: cids,
        });
        self
    }
}

#[async_trait]
impl DistributionSource for MockDistributionSource {
    async fn provider_distribution(
        &self,
        _client_ids: &[String],
    ) -> Result<Vec<RawProviderRow>, UpstreamError> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_providers {
            return Err(unavailable("provider table"));
        }
        Ok(self.providers.clone())
    }

    async fn replica_distribution(
        &self,
        _client_ids: &[String],
        current_epoch: i64,
    ) -> Result<Vec<RawReplicaRow>, UpstreamError> {
        self.replica_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut epoch) = self.last_epoch.lock() {
            *epoch = Some(current_epoch);
        }
        if self.fail_replicas {
            return Err(unavailable("replica table"));
        }
        Ok(self.replicas.clone())
    }

    async fn cid_sharing(
        &self,
        _client_ids: &[String],
    ) -> Result<Vec<RawCidSharingRow>, UpstreamError> {
        self.sharing_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sharing {
            return Err(unavailable("sharing table"));
        }
        Ok(self.sharing.clone())
    }
}

/// Ticket system keyed by issue reference.
#[derive(Default)]
pub struct MockTickets {
    comments: HashMap<String, Vec<IssueComment>>,
    pub calls: AtomicU32,
}

impl MockTickets {
    pub fn with_comment(mut self, issue: &str, author: &str, body: &str) -> Self {
        self.comments
            .entry(issue.to_string())
            .or_default()
            .push(IssueComment {
                author: author.to_string(),
                body: body.to_string(),
            });
        self
    }
}

#[async_trait]
impl TicketSystem for MockTickets {
    async fn issue_comments(
        &self,
        issue_reference: &str,
    ) -> Result<Vec<IssueComment>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.comments
            .get(issue_reference)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(issue_reference.to_string()))
    }
}

/// Artifact store that records uploads.
#[derive(Default)]
pub struct MockArtifactStore {
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl MockArtifactStore {
    pub fn uploaded(&self) -> Vec<(String, String)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn upload(
        &self,
        path: &str,
        content: &[u8],
        _commit_message: &str,
    ) -> Result<ArtifactLocation, UpstreamError> {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((path.to_string(), String::from_utf8_lossy(content).to_string()));
        }
        Ok(ArtifactLocation {
            download_url: format!("https://raw.example.com/{}", path),
            view_url: format!("https://example.com/view/{}", path),
        })
    }
}

/// Report store whose writes always fail.
#[derive(Default)]
pub struct FailingReportStore {
    pub calls: AtomicU32,
}

#[async_trait]
impl ReportStore for FailingReportStore {
    async fn insert_report(
        &self,
        _client_address_id: &str,
        _file_path: &str,
    ) -> Result<GeneratedReportRecord, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(UpstreamError::Storage("disk full".to_string()))
    }

    async fn latest_report(
        &self,
        _client_address_id: &str,
    ) -> Result<Option<GeneratedReportRecord>, UpstreamError> {
        Ok(None)
    }

    async fn report_history(
        &self,
        _client_address_id: &str,
    ) -> Result<Vec<GeneratedReportRecord>, UpstreamError> {
        Ok(Vec::new())
    }

    async fn insert_allocator_report(
        &self,
        _address: &str,
        _address_id: &str,
        _name: &str,
        _url: &str,
    ) -> Result<AllocatorReportRecord, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(UpstreamError::Storage("disk full".to_string()))
    }

    async fn latest_allocator_report(
        &self,
        _address: &str,
    ) -> Result<Option<AllocatorReportRecord>, UpstreamError> {
        Ok(None)
    }

    async fn allocator_report_history(
        &self,
        _address: &str,
    ) -> Result<Vec<AllocatorReportRecord>, UpstreamError> {
        Ok(Vec::new())
    }
}
