//! End-to-end report pipeline.
//!
//! address -> application info -> network id -> concurrent dataset fetch ->
//! evaluation -> synthesis -> upload -> persistence.
//!
//! Terminal failures never escape as errors: they are rendered into a short
//! markdown document the caller can post instead of a report.

use crate::cache::Cache;
use crate::criteria::{CriteriaEvaluator, EvaluationOutcome};
use crate::distribution::{DistributionAggregator, Distributions};
use crate::error::{PipelineError, UpstreamError};
use crate::models::{
    AllocatorReportRecord, ApplicationInfo, ArtifactLocation, GeneratedReportRecord,
    RetrievabilitySummary,
};
use crate::report::{PersistTarget, ReportContext, ReportDocuments, ReportSynthesizer};
use crate::resolver::ApplicationInfoResolver;
use crate::retrievability::{summarize, RetrievabilityAggregator};
use crate::retry::{retry, RetryPolicy};
use crate::upstream::{
    AddressResolver, ApplicationLookup, ArtifactStore, DistributionSource, GeoLookup,
    ProviderInfoLookup, ReportStore, RetrievalStatsLookup, TicketSystem,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// External services the pipeline talks to.
pub struct Collaborators {
    pub addresses: Arc<dyn AddressResolver>,
    pub applications: Arc<dyn ApplicationLookup>,
    pub provider_info: Arc<dyn ProviderInfoLookup>,
    pub geo: Arc<dyn GeoLookup>,
    pub retrieval_stats: Arc<dyn RetrievalStatsLookup>,
    pub distributions: Arc<dyn DistributionSource>,
    pub tickets: Arc<dyn TicketSystem>,
    /// `None` disables uploads.
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
    pub reports: Arc<dyn ReportStore>,
}

/// Allocator identity used for the allocator-scoped report table.
#[derive(Debug, Clone)]
pub struct AllocatorIdentity {
    pub address: String,
    pub name: String,
}

/// A completed report with the data it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub address: String,
    pub client_id: String,
    pub generated_at: DateTime<Utc>,
    pub application: ApplicationInfo,
    pub distributions: Distributions,
    pub retrievability: RetrievabilitySummary,
    pub evaluation: EvaluationOutcome,
    pub documents: ReportDocuments,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactLocation>,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutput {
    Report(Box<GeneratedReport>),
    ErrorDocument { markdown: String },
}

impl PipelineOutput {
    pub fn summary(&self) -> &str {
        match self {
            PipelineOutput::Report(report) => &report.documents.summary,
            PipelineOutput::ErrorDocument { markdown } => markdown,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutput::Report(_) => 0,
            PipelineOutput::ErrorDocument { .. } => 2,
        }
    }
}

pub struct ReportPipeline {
    addresses: Arc<dyn AddressResolver>,
    resolver: Arc<ApplicationInfoResolver>,
    distribution: DistributionAggregator,
    retrievability: RetrievabilityAggregator,
    evaluator: CriteriaEvaluator,
    synthesizer: ReportSynthesizer,
    reports: Arc<dyn ReportStore>,
    retry: RetryPolicy,
    window_days: u32,
}

impl ReportPipeline {
    pub fn new(
        collaborators: Collaborators,
        application_cache: Arc<dyn Cache<String, Option<ApplicationInfo>>>,
        evaluator: CriteriaEvaluator,
        retry: RetryPolicy,
        window_days: u32,
    ) -> Self {
        let resolver = Arc::new(ApplicationInfoResolver::new(
            collaborators.applications,
            application_cache,
            retry,
        ));

        let distribution = DistributionAggregator::new(
            collaborators.distributions,
            collaborators.provider_info,
            collaborators.geo,
            resolver.clone(),
            collaborators.tickets,
            retry,
        );

        Self {
            addresses: collaborators.addresses,
            resolver,
            distribution,
            retrievability: RetrievabilityAggregator::new(collaborators.retrieval_stats, retry),
            evaluator,
            synthesizer: ReportSynthesizer::new(
                collaborators.artifacts,
                collaborators.reports.clone(),
            ),
            reports: collaborators.reports,
            retry,
            window_days,
        }
    }

    /// Generate, publish and record a report for a client address.
    pub async fn run(&self, address: &str) -> PipelineOutput {
        self.finish(address, self.generate(address, None).await)
    }

    /// Same as [`run`](Self::run), recorded against an allocator instead.
    pub async fn run_for_allocator(&self, address: &str, allocator: &AllocatorIdentity) -> PipelineOutput {
        self.finish(address, self.generate(address, Some(allocator)).await)
    }

    /// Reports previously recorded for `address`, newest first.
    pub async fn history(&self, address: &str) -> Result<Vec<GeneratedReportRecord>, UpstreamError> {
        let client_id = self.resolve_id(address).await?;
        self.reports.report_history(&client_id).await
    }

    /// Most recent report recorded for `address`.
    pub async fn latest(&self, address: &str) -> Result<Option<GeneratedReportRecord>, UpstreamError> {
        let client_id = self.resolve_id(address).await?;
        self.reports.latest_report(&client_id).await
    }

    /// Most recent report recorded for an allocator.
    pub async fn latest_allocator(&self, address: &str) -> Result<Option<AllocatorReportRecord>, UpstreamError> {
        self.reports.latest_allocator_report(address).await
    }

    /// Reports previously recorded for an allocator, newest first.
    pub async fn allocator_history(&self, address: &str) -> Result<Vec<AllocatorReportRecord>, UpstreamError> {
        self.reports.allocator_report_history(address).await
    }

    fn finish(&self, address: &str, result: Result<GeneratedReport, PipelineError>) -> PipelineOutput {
        match result {
            Ok(report) => PipelineOutput::Report(Box::new(report)),
            Err(e) => {
                warn!("Report for {} ended early: {}", address, e);
                PipelineOutput::ErrorDocument {
                    markdown: e.to_markdown(),
                }
            }
        }
    }

    async fn resolve_id(&self, address: &str) -> Result<String, UpstreamError> {
        retry(self.retry, "address resolution", || self.addresses.resolve(address)).await
    }

    async fn generate(
        &self,
        address: &str,
        allocator: Option<&AllocatorIdentity>,
    ) -> Result<GeneratedReport, PipelineError> {
        let generated_at = Utc::now();

        let application = self
            .resolver
            .resolve(address)
            .await
            .map_err(|source| PipelineError::ApplicationLookup {
                address: address.to_string(),
                source,
            })?
            .ok_or_else(|| PipelineError::NoApplicationInfo {
                address: address.to_string(),
            })?;

        let client_id = self
            .resolve_id(address)
            .await
            .map_err(|source| PipelineError::AddressResolution {
                address: address.to_string(),
                source,
            })?;
        info!("Generating report for {} ({})", address, client_id);

        let client_ids = vec![client_id.clone()];
        let (distributions, rates) = tokio::join!(
            self.distribution.aggregate(&client_ids),
            self.retrievability.fetch(self.window_days, generated_at),
        );

        if distributions.providers.is_empty() {
            return Err(PipelineError::NoActiveDeals {
                address: address.to_string(),
            });
        }

        let retrievability = summarize(&distributions.providers, &rates);
        let evaluation = self.evaluator.assess(
            application.number_of_allocations,
            &distributions,
            &retrievability,
        );

        let mut documents = self.synthesizer.synthesize(&ReportContext {
            address,
            client_id: &client_id,
            application: &application,
            distributions: &distributions,
            retrievability: &retrievability,
            outcome: &evaluation,
            retrievability_threshold: self.evaluator.retrievability_threshold(),
            low_success_rate: self.evaluator.low_success_rate(),
            window_days: self.window_days,
            generated_at,
        });

        // The allocator id only keys the stored record; failing to resolve it
        // keeps the report and skips the record.
        let allocator_id = match allocator {
            Some(identity) => match self.resolve_id(&identity.address).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        "Could not resolve allocator {}, report will not be recorded: {}",
                        identity.address, e
                    );
                    None
                }
            },
            None => None,
        };

        let target = match (allocator, allocator_id.as_deref()) {
            (Some(identity), Some(address_id)) => Some(PersistTarget::Allocator {
                address: &identity.address,
                address_id,
                name: &identity.name,
            }),
            (Some(_), None) => None,
            (None, _) => Some(PersistTarget::Client {
                client_id: &client_id,
            }),
        };

        let artifact = self
            .synthesizer
            .publish(address, generated_at, &mut documents, target)
            .await;

        Ok(GeneratedReport {
            address: address.to_string(),
            client_id,
            generated_at,
            application,
            distributions,
            retrievability,
            evaluation,
            documents,
            artifact,
        })
    }
}
