//! External collaborators.
//!
//! Every service the pipeline talks to sits behind one of the traits below.
//! The HTTP-backed implementations live in the submodules; the relational
//! store and the artifact repository live in [`crate::store`].

pub mod geo;
pub mod github;
pub mod lotus;
pub mod registry;
pub mod retrieval;

#[cfg(test)]
pub mod mock;

use crate::error::UpstreamError;
use crate::models::{
    AllocatorReportRecord, ArtifactLocation, GeneratedReportRecord, GeoResult, ProviderSuccessRate,
    RawApplicationRecord, RawCidSharingRow, RawProviderRow, RawReplicaRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;

pub use geo::GeoClient;
pub use github::{extract_approvers, GitHubTickets, IssueComment};
pub use lotus::LotusClient;
pub use registry::RegistryClient;
pub use retrieval::RetrievalStatsClient;

/// Resolves a client address to its network id.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<String, UpstreamError>;
}

/// Verifier registry lookup.
#[async_trait]
pub trait ApplicationLookup: Send + Sync {
    async fn find_by_address(&self, address: &str)
        -> Result<Vec<RawApplicationRecord>, UpstreamError>;
}

/// Network addresses a storage provider announces.
#[async_trait]
pub trait ProviderInfoLookup: Send + Sync {
    /// Multiaddrs in text form, e.g. `/ip4/1.2.3.4/tcp/24001`.
    async fn provider_network_info(&self, provider_id: &str) -> Result<Vec<String>, UpstreamError>;
}

/// IP geolocation.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<GeoResult, UpstreamError>;
}

/// Network-wide retrieval statistics.
#[async_trait]
pub trait RetrievalStatsLookup: Send + Sync {
    async fn success_rates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderSuccessRate>, UpstreamError>;
}

/// Pre-aggregated distribution tables.
#[async_trait]
pub trait DistributionSource: Send + Sync {
    async fn provider_distribution(
        &self,
        client_ids: &[String],
    ) -> Result<Vec<RawProviderRow>, UpstreamError>;

    /// Rows for deals still active at `current_epoch`.
    async fn replica_distribution(
        &self,
        client_ids: &[String],
        current_epoch: i64,
    ) -> Result<Vec<RawReplicaRow>, UpstreamError>;

    async fn cid_sharing(&self, client_ids: &[String])
        -> Result<Vec<RawCidSharingRow>, UpstreamError>;
}

/// Ticket system holding allocation requests.
#[async_trait]
pub trait TicketSystem: Send + Sync {
    /// All comments on the referenced issue, oldest first.
    async fn issue_comments(&self, issue_reference: &str)
        -> Result<Vec<IssueComment>, UpstreamError>;

    /// Authors of approval and proposal comments on the issue.
    async fn approvers(&self, issue_reference: &str) -> Result<Vec<String>, UpstreamError> {
        let comments = self.issue_comments(issue_reference).await?;
        Ok(extract_approvers(&comments))
    }
}

/// Storage for uploaded report artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        content: &[u8],
        commit_message: &str,
    ) -> Result<ArtifactLocation, UpstreamError>;
}

/// Append-only pointers to generated reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(
        &self,
        client_address_id: &str,
        file_path: &str,
    ) -> Result<GeneratedReportRecord, UpstreamError>;

    async fn latest_report(
        &self,
        client_address_id: &str,
    ) -> Result<Option<GeneratedReportRecord>, UpstreamError>;

    /// Newest first.
    async fn report_history(
        &self,
        client_address_id: &str,
    ) -> Result<Vec<GeneratedReportRecord>, UpstreamError>;

    async fn insert_allocator_report(
        &self,
        address: &str,
        address_id: &str,
        name: &str,
        url: &str,
    ) -> Result<AllocatorReportRecord, UpstreamError>;

    async fn latest_allocator_report(
        &self,
        address: &str,
    ) -> Result<Option<AllocatorReportRecord>, UpstreamError>;

    /// Newest first.
    async fn allocator_report_history(
        &self,
        address: &str,
    ) -> Result<Vec<AllocatorReportRecord>, UpstreamError>;
}

/// Check a response status and turn failures into [`UpstreamError::Status`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, UpstreamError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if status == 404 {
        return Err(UpstreamError::NotFound(body));
    }
    Err(UpstreamError::Status { status, body })
}

/// Build the shared HTTP client.
pub fn http_client(timeout_seconds: u64) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .user_agent(concat!("capcheck/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| UpstreamError::Transport(e.to_string()))
}
