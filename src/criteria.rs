//! Health criteria evaluation.
//!
//! A tier of thresholds is selected from the client's allocation count and
//! every rule is evaluated independently against the aggregated data.

use crate::config::EvaluationConfig;
use crate::distribution::Distributions;
use crate::models::{
    CidSharing, Criteria, Finding, FindingCategory, FindingKind, ProviderDistribution,
    ReplicaDistribution, RetrievabilitySummary,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Number of sharing clients called out individually.
pub const TOP_SHARING_CLIENTS: usize = 3;

/// Tier chosen for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSelection {
    pub index: usize,
    pub criteria: Criteria,
    /// More tiers are configured than allocations granted; thresholds are
    /// presented as relaxed.
    pub early_allocation: bool,
}

/// Findings plus the tier they were evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub tier: TierSelection,
    pub findings: Vec<Finding>,
}

impl EvaluationOutcome {
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.kind != FindingKind::Healthy)
    }

    pub fn in_category(&self, category: FindingCategory) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }
}

/// Pick the tier for `allocations`; the last tier applies once allocations
/// outnumber the configured tiers.
pub fn select_tier(tiers: &[Criteria], allocations: u32) -> TierSelection {
    if tiers.is_empty() {
        return TierSelection {
            index: 0,
            criteria: Criteria::default(),
            early_allocation: false,
        };
    }

    let allocations = allocations as usize;
    let index = tiers.len().min(allocations).saturating_sub(1);
    TierSelection {
        index,
        criteria: tiers[index],
        early_allocation: tiers.len() > allocations,
    }
}

pub struct CriteriaEvaluator {
    tiers: Vec<Criteria>,
    retrievability_threshold: f64,
    low_success_rate: f64,
}

impl From<&EvaluationConfig> for CriteriaEvaluator {
    fn from(config: &EvaluationConfig) -> Self {
        Self::new(
            config.criteria.clone(),
            config.retrievability_threshold,
            config.low_success_rate,
        )
    }
}

impl CriteriaEvaluator {
    pub fn new(tiers: Vec<Criteria>, retrievability_threshold: f64, low_success_rate: f64) -> Self {
        Self {
            tiers,
            retrievability_threshold,
            low_success_rate,
        }
    }

    pub fn retrievability_threshold(&self) -> f64 {
        self.retrievability_threshold
    }

    pub fn low_success_rate(&self) -> f64 {
        self.low_success_rate
    }

    /// Select the tier and evaluate everything against it.
    pub fn assess(
        &self,
        allocations: u32,
        distributions: &Distributions,
        retrievability: &RetrievabilitySummary,
    ) -> EvaluationOutcome {
        let tier = select_tier(&self.tiers, allocations);
        debug!(
            "Using criteria tier {} for {} allocations (early: {})",
            tier.index, allocations, tier.early_allocation
        );

        let findings = self.evaluate(
            &tier.criteria,
            &distributions.providers,
            &distributions.replicas,
            retrievability,
            &distributions.sharing,
        );

        EvaluationOutcome { tier, findings }
    }

    /// Run every rule in order; no rule short-circuits another.
    pub fn evaluate(
        &self,
        tier: &Criteria,
        providers: &[ProviderDistribution],
        replicas: &[ReplicaDistribution],
        retrievability: &RetrievabilitySummary,
        sharing: &[CidSharing],
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let provider_warning = |kind, p: &ProviderDistribution, value| {
            Finding::warning(
                kind,
                FindingCategory::ProviderDistribution,
                Some(p.provider.clone()),
                value,
            )
        };

        findings.extend(
            providers
                .iter()
                .filter(|p| p.percentage_of_client_total > tier.max_provider_deal_percentage)
                .map(|p| {
                    provider_warning(
                        FindingKind::ProviderOverConcentration,
                        p,
                        p.percentage_of_client_total,
                    )
                }),
        );

        findings.extend(
            providers
                .iter()
                .filter(|p| p.duplication_percentage > tier.max_duplication_percentage)
                .map(|p| {
                    provider_warning(
                        FindingKind::ProviderOverDuplication,
                        p,
                        p.duplication_percentage,
                    )
                }),
        );

        findings.extend(
            providers
                .iter()
                .filter(|p| !p.location.as_ref().map(|l| l.has_country()).unwrap_or(false))
                .map(|p| provider_warning(FindingKind::ProviderNoLocation, p, 0.0)),
        );

        let regions: HashSet<String> = providers.iter().map(|p| p.rendered_location()).collect();
        if regions.len() <= 1 {
            findings.push(Finding::warning(
                FindingKind::SingleRegion,
                FindingCategory::ProviderDistribution,
                None,
                regions.len() as f64,
            ));
        }

        let provider_rules_fired = !findings.is_empty();

        let low_replica_share: f64 = replicas
            .iter()
            .filter(|r| r.number_of_replicas <= tier.low_replica_threshold)
            .map(|r| r.percentage_of_client_total)
            .sum();
        let low_replica_fired = low_replica_share > tier.max_percentage_for_low_replica;
        if low_replica_fired {
            findings.push(Finding::warning(
                FindingKind::LowReplicaOverage,
                FindingCategory::Replication,
                None,
                low_replica_share,
            ));
        }

        let rates = &retrievability.per_provider;
        if !rates.is_empty() {
            let fraction = |pred: &dyn Fn(f64) -> bool| {
                rates.iter().filter(|r| pred(r.success_rate)).count() as f64 / rates.len() as f64
            };

            let zero = fraction(&|rate| rate == 0.0);
            if zero > 0.0 {
                findings.push(Finding::warning(
                    FindingKind::RetrievabilityZero,
                    FindingCategory::Retrievability,
                    None,
                    zero,
                ));
            }

            let low = fraction(&|rate| rate < self.low_success_rate);
            if low > 0.0 {
                findings.push(Finding::warning(
                    FindingKind::RetrievabilityLow,
                    FindingCategory::Retrievability,
                    None,
                    low,
                ));
            }

            if retrievability.weighted_average < self.retrievability_threshold {
                findings.push(Finding::warning(
                    FindingKind::RetrievabilityBelowThreshold,
                    FindingCategory::Retrievability,
                    None,
                    retrievability.weighted_average,
                ));
            }
        }

        findings.extend(sharing.iter().take(TOP_SHARING_CLIENTS).map(|s| {
            Finding::warning(
                FindingKind::CidSharingObserved,
                FindingCategory::CidSharing,
                Some(s.other_client_address.clone()),
                s.unique_cid_count as f64,
            )
        }));

        if !provider_rules_fired && !low_replica_fired {
            findings.push(Finding::healthy(FindingCategory::ProviderDistribution));
        }
        if !low_replica_fired {
            findings.push(Finding::healthy(FindingCategory::Replication));
        }

        findings
    }
}
