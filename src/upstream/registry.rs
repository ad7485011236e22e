//! Verified client registry client.

use super::{ensure_success, ApplicationLookup};
use crate::error::UpstreamError;
use crate::models::RawApplicationRecord;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct VerifiedClientsResponse {
    #[serde(default)]
    data: Vec<VerifiedClient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiedClient {
    address: String,
    #[serde(default)]
    address_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    verifier_name: Option<String>,
    #[serde(default)]
    initial_allowance: Option<String>,
    #[serde(default)]
    allowance_array: Vec<Allowance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Allowance {
    #[serde(default)]
    audit_trail: Option<String>,
}

impl VerifiedClient {
    fn into_record(self) -> RawApplicationRecord {
        let issue_reference = self
            .allowance_array
            .iter()
            .filter_map(|a| a.audit_trail.as_deref())
            .find(|t| !t.is_empty() && *t != "n/a")
            .map(String::from);

        RawApplicationRecord {
            address: self.address,
            name: self.name.unwrap_or_default(),
            verifier: self.verifier_name.unwrap_or_default(),
            issue_reference,
            initial_allowance: self.initial_allowance.unwrap_or_else(|| "0".to_string()),
            allocation_count: self.allowance_array.len() as u32,
        }
    }
}

/// Registry API client.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ApplicationLookup for RegistryClient {
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<RawApplicationRecord>, UpstreamError> {
        let url = format!("{}/getVerifiedClients", self.base_url.trim_end_matches('/'));
        debug!("Looking up application for {}", address);

        let response = self
            .http
            .get(&url)
            .query(&[("filter", address)])
            .send()
            .await?;
        let body: VerifiedClientsResponse = ensure_success(response).await?.json().await?;

        let records = body
            .data
            .into_iter()
            .filter(|c| c.address == address || c.address_id.as_deref() == Some(address))
            .map(VerifiedClient::into_record)
            .collect();

        Ok(records)
    }
}
