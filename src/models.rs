//! Data models for the allocation checker.
//!
//! This module contains the core data structures shared by the resolver,
//! the aggregators, the criteria evaluator and the report synthesizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Allocation metadata for a client address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    /// The client address the application was filed for.
    pub client_address: String,
    /// Organization that filed the application.
    pub organization_name: String,
    /// Verifier (notary) that granted the allocation.
    pub verifier: String,
    /// Reference to the ticket that tracks the application, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_reference: Option<String>,
    /// Number of allocations granted so far.
    pub number_of_allocations: u32,
}

/// Raw application record returned by the verifier registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawApplicationRecord {
    pub address: String,
    pub name: String,
    pub verifier: String,
    pub issue_reference: Option<String>,
    /// Initial allowance in bytes, as a decimal string.
    pub initial_allowance: String,
    pub allocation_count: u32,
}

/// Geographic location of a storage provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub city: String,
    pub region: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Network operator reported alongside the location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
}

impl Location {
    /// Renders `city, region, country`.
    pub fn render(&self) -> String {
        format!("{}, {}, {}", self.city, self.region, self.country)
    }

    pub fn has_country(&self) -> bool {
        !self.country.trim().is_empty()
    }
}

/// Result of a geo lookup for a single network address.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoResult {
    Located(Location),
    /// Private or reserved address space; carries no location.
    Bogon,
}

/// Per-provider share of a client's deals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDistribution {
    pub provider: String,
    /// Total deal size in bytes.
    pub total_deal_size: f64,
    /// Unique data size in bytes.
    pub unique_data_size: f64,
    /// `(total - unique) / total`.
    pub duplication_percentage: f64,
    /// Share of this provider in the client group's total.
    pub percentage_of_client_total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// The client group contains the provider's first ever client.
    pub is_new_provider: bool,
}

impl ProviderDistribution {
    /// Rendered location, `Unknown` when no location was resolved.
    pub fn rendered_location(&self) -> String {
        self.location
            .as_ref()
            .map(Location::render)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Operator name, used to group providers in the report.
    pub fn org_name(&self) -> &str {
        self.location
            .as_ref()
            .and_then(|l| l.org_name.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Share of deals stored with a given number of replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaDistribution {
    pub number_of_replicas: u32,
    pub total_deal_size: f64,
    pub unique_data_size: f64,
    pub percentage_of_client_total: f64,
}

/// Another client storing some of the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CidSharing {
    pub other_client_address: String,
    pub total_deal_size: f64,
    pub unique_cid_count: u64,
    /// Application of the other client, when it could be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_application: Option<ApplicationInfo>,
    /// Approvers of the other client's application, when they could be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvers: Option<Vec<String>>,
}

impl CidSharing {
    pub fn rendered_organization(&self) -> String {
        self.other_application
            .as_ref()
            .map(|a| a.organization_name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn rendered_verifier(&self) -> String {
        self.other_application
            .as_ref()
            .map(|a| a.verifier.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn rendered_approvers(&self) -> String {
        match &self.approvers {
            Some(approvers) if !approvers.is_empty() => approvers.join(", "),
            _ => "Unknown".to_string(),
        }
    }
}

/// Raw per-provider totals as read from the distribution tables.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProviderRow {
    pub provider: String,
    pub total_deal_size: String,
    pub unique_data_size: String,
    /// First client this provider ever served.
    pub first_client: Option<String>,
}

/// Raw per-replica-count totals.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReplicaRow {
    pub num_of_replicas: u32,
    pub total_deal_size: String,
    pub unique_data_size: String,
}

/// Raw CID sharing row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCidSharingRow {
    pub other_client_address: String,
    pub total_deal_size: String,
    pub unique_cid_count: u64,
}

/// Network-wide retrieval success rate of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSuccessRate {
    pub provider_id: String,
    pub success_rate: f64,
}

/// Retrieval statistics joined to one of the client's providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrievability {
    pub provider_id: String,
    /// In `[0, 1]`.
    pub success_rate: f64,
    /// Weight used for the average.
    pub total_deal_size: f64,
}

/// Retrievability view of a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievabilitySummary {
    pub per_provider: Vec<Retrievability>,
    pub weighted_average: f64,
}

impl RetrievabilitySummary {
    pub fn success_rate_of(&self, provider: &str) -> Option<f64> {
        self.per_provider
            .iter()
            .find(|r| r.provider_id == provider)
            .map(|r| r.success_rate)
    }
}

/// Thresholds of one evaluation tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    pub max_provider_deal_percentage: f64,
    pub max_duplication_percentage: f64,
    pub low_replica_threshold: u32,
    pub max_percentage_for_low_replica: f64,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            max_provider_deal_percentage: 0.25,
            max_duplication_percentage: 0.20,
            low_replica_threshold: 3,
            max_percentage_for_low_replica: 0.25,
        }
    }
}

/// Outcome level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "OK"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Ok => "✔️",
            Severity::Warning => "⚠️",
        }
    }
}

/// Section of the report a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    ProviderDistribution,
    Replication,
    Retrievability,
    CidSharing,
}

/// Closed set of rule outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    ProviderOverConcentration,
    ProviderOverDuplication,
    ProviderNoLocation,
    SingleRegion,
    LowReplicaOverage,
    RetrievabilityZero,
    RetrievabilityLow,
    RetrievabilityBelowThreshold,
    CidSharingObserved,
    Healthy,
}

/// A single evaluated rule outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub category: FindingCategory,
    /// Provider id or other client address the finding is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Numeric value quoted in the rendered message.
    pub value: f64,
}

impl Finding {
    pub fn warning(
        kind: FindingKind,
        category: FindingCategory,
        subject: Option<String>,
        value: f64,
    ) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            category,
            subject,
            value,
        }
    }

    pub fn healthy(category: FindingCategory) -> Self {
        Self {
            kind: FindingKind::Healthy,
            severity: Severity::Ok,
            category,
            subject: None,
            value: 0.0,
        }
    }
}

/// Pointer to a generated report, keyed by client id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReportRecord {
    pub id: i64,
    pub client_address_id: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

/// Pointer to a generated report, keyed by allocator identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorReportRecord {
    pub id: i64,
    pub address: String,
    pub address_id: String,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Location of an uploaded report artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub download_url: String,
    pub view_url: String,
}
