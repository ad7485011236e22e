//! Application info resolution.
//!
//! Maps a client address to its allocation metadata. Both hits and misses
//! are cached; lookup failures are not.

use crate::cache::Cache;
use crate::distribution::parse_decimal;
use crate::error::UpstreamError;
use crate::models::{ApplicationInfo, RawApplicationRecord};
use crate::retry::{retry, RetryPolicy};
use crate::upstream::ApplicationLookup;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves and caches application records.
pub struct ApplicationInfoResolver {
    lookup: Arc<dyn ApplicationLookup>,
    cache: Arc<dyn Cache<String, Option<ApplicationInfo>>>,
    retry: RetryPolicy,
}

impl ApplicationInfoResolver {
    pub fn new(
        lookup: Arc<dyn ApplicationLookup>,
        cache: Arc<dyn Cache<String, Option<ApplicationInfo>>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lookup,
            cache,
            retry,
        }
    }

    /// Resolve `address`; `Ok(None)` means the registry has no record.
    pub async fn resolve(&self, address: &str) -> Result<Option<ApplicationInfo>, UpstreamError> {
        let key = address.to_string();
        if let Some(cached) = self.cache.get(&key) {
            debug!("Application cache hit for {}", address);
            return Ok(cached);
        }

        let records = retry(self.retry, "application lookup", || {
            self.lookup.find_by_address(address)
        })
        .await?;

        let info = select_record(&records).map(|record| ApplicationInfo {
            client_address: address.to_string(),
            organization_name: record.name.clone(),
            verifier: record.verifier.clone(),
            issue_reference: record.issue_reference.clone(),
            number_of_allocations: record.allocation_count,
        });

        match &info {
            Some(i) => info!(
                "Resolved {} to {} ({} allocations)",
                address, i.organization_name, i.number_of_allocations
            ),
            None => info!("No application record for {}", address),
        }

        self.cache.set(key, info.clone());
        Ok(info)
    }
}

/// The record with the largest initial allowance; the first one wins ties.
pub fn select_record(records: &[RawApplicationRecord]) -> Option<&RawApplicationRecord> {
    records.iter().fold(None, |best, record| match best {
        Some(current)
            if parse_decimal(&record.initial_allowance)
                <= parse_decimal(&current.initial_allowance) =>
        {
            Some(current)
        }
        _ => Some(record),
    })
}
