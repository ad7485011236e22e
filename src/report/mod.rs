//! Report synthesis and publication.

pub mod builder;
pub mod generator;

pub use builder::{summary_is_contained, ReportDocuments};
pub use generator::{generate_documents, generate_json_report, ReportContext};

use crate::models::ArtifactLocation;
use crate::upstream::{ArtifactStore, ReportStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where the pointer to a published report is recorded.
#[derive(Debug, Clone, Copy)]
pub enum PersistTarget<'a> {
    /// Keyed by the client's network id.
    Client { client_id: &'a str },
    /// Keyed by allocator identity.
    Allocator {
        address: &'a str,
        address_id: &'a str,
        name: &'a str,
    },
}

/// Path of the full report inside the artifact repository.
pub fn artifact_path(address: &str, generated_at: DateTime<Utc>) -> String {
    format!(
        "{}/{}.md",
        address,
        generated_at.format("%Y-%m-%dT%H-%M-%SZ")
    )
}

pub struct ReportSynthesizer {
    artifacts: Option<Arc<dyn ArtifactStore>>,
    store: Arc<dyn ReportStore>,
}

impl ReportSynthesizer {
    /// `artifacts` is `None` when uploads are disabled.
    pub fn new(artifacts: Option<Arc<dyn ArtifactStore>>, store: Arc<dyn ReportStore>) -> Self {
        Self { artifacts, store }
    }

    pub fn synthesize(&self, ctx: &ReportContext<'_>) -> ReportDocuments {
        let documents = generate_documents(ctx);
        debug_assert!(summary_is_contained(&documents.summary, &documents.full));
        documents
    }

    /// Upload the full report, link it from the summary and record it.
    ///
    /// Upload and persistence failures are logged; the documents are still
    /// returned to the caller. With no `target` the report is uploaded but
    /// not recorded.
    pub async fn publish(
        &self,
        address: &str,
        generated_at: DateTime<Utc>,
        documents: &mut ReportDocuments,
        target: Option<PersistTarget<'_>>,
    ) -> Option<ArtifactLocation> {
        let artifacts = match self.artifacts {
            Some(ref artifacts) => artifacts,
            None => {
                info!("Artifact upload disabled; report kept local");
                return None;
            }
        };

        let path = artifact_path(address, generated_at);
        let message = format!("Add DataCap report for {}", address);
        let location = match artifacts
            .upload(&path, documents.full.as_bytes(), &message)
            .await
        {
            Ok(location) => location,
            Err(e) => {
                error!("Failed to upload report {}: {}", path, e);
                return None;
            }
        };

        info!("Uploaded full report to {}", location.view_url);
        documents.link_artifact(&location);
        match target {
            Some(target) => self.persist(target, &location.download_url).await,
            None => warn!("No record key for {}; report uploaded but not recorded", path),
        }
        Some(location)
    }

    async fn persist(&self, target: PersistTarget<'_>, url: &str) {
        let result = match target {
            PersistTarget::Client { client_id } => self
                .store
                .insert_report(client_id, url)
                .await
                .map(|record| record.id),
            PersistTarget::Allocator {
                address,
                address_id,
                name,
            } => self
                .store
                .insert_allocator_report(address, address_id, name, url)
                .await
                .map(|record| record.id),
        };

        match result {
            Ok(id) => info!("Recorded generated report #{}", id),
            Err(e) => warn!("Could not record generated report, continuing: {}", e),
        }
    }
}
