//! Markdown report generation.
//!
//! Renders the evaluated distributions into the summary and full report.
//! Headline findings are shared between both documents; tables, per-item
//! lines and footnotes only appear in the full report.

use super::builder::{ReportBuilder, ReportDocuments};
use crate::criteria::EvaluationOutcome;
use crate::distribution::Distributions;
use crate::models::{
    ApplicationInfo, CidSharing, Finding, FindingCategory, FindingKind, ProviderDistribution,
    ReplicaDistribution, RetrievabilitySummary, Severity,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

const NEW_PROVIDER_MARKER: &str = "⭐";

/// Everything a report is rendered from.
pub struct ReportContext<'a> {
    pub address: &'a str,
    pub client_id: &'a str,
    pub application: &'a ApplicationInfo,
    pub distributions: &'a Distributions,
    pub retrievability: &'a RetrievabilitySummary,
    pub outcome: &'a EvaluationOutcome,
    pub retrievability_threshold: f64,
    pub low_success_rate: f64,
    pub window_days: u32,
    pub generated_at: DateTime<Utc>,
}

/// Render both documents.
pub fn generate_documents(ctx: &ReportContext<'_>) -> ReportDocuments {
    let mut builder = ReportBuilder::new();

    generate_header(&mut builder, ctx);
    generate_provider_section(&mut builder, ctx);
    generate_replication_section(&mut builder, ctx);
    generate_retrievability_section(&mut builder, ctx);
    generate_sharing_section(&mut builder, ctx);
    generate_footer(&mut builder);

    builder.finish()
}

/// Binary units with two decimals.
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

pub fn format_percentage(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

fn generate_header(builder: &mut ReportBuilder, ctx: &ReportContext<'_>) {
    let app = ctx.application;
    builder
        .add_shared(format!("# DataCap Report for {}", app.organization_name))
        .add_shared("")
        .add_shared(format!("- **Client Address:** `{}`", ctx.address))
        .add_shared(format!("- **Client ID:** `{}`", ctx.client_id))
        .add_shared(format!("- **Verifier:** {}", app.verifier))
        .add_shared(format!("- **Allocations:** {}", app.number_of_allocations));

    if let Some(ref issue) = app.issue_reference {
        builder.add_shared(format!("- **Application:** {}", issue));
    }

    builder.add_detail(format!(
        "- **Generated:** {}",
        ctx.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    builder.add_detail(format!(
        "- **Criteria Tier:** {}{}",
        ctx.outcome.tier.index + 1,
        if ctx.outcome.tier.early_allocation {
            " (early allocation)"
        } else {
            ""
        }
    ));
    builder.add_shared("");
}

/// Suffix for thresholds that are relaxed in early allocations.
fn relaxed(ctx: &ReportContext<'_>) -> &'static str {
    if ctx.outcome.tier.early_allocation {
        " (relaxed for early allocation)"
    } else {
        ""
    }
}

/// Findings of one category grouped by kind, in emission order.
fn grouped(outcome: &EvaluationOutcome, category: FindingCategory) -> Vec<(FindingKind, Vec<&Finding>)> {
    let mut groups: Vec<(FindingKind, Vec<&Finding>)> = Vec::new();
    for finding in outcome.in_category(category) {
        match groups.iter_mut().find(|(kind, _)| *kind == finding.kind) {
            Some((_, members)) => members.push(finding),
            None => groups.push((finding.kind, vec![finding])),
        }
    }
    groups
}

fn headline(
    ctx: &ReportContext<'_>,
    category: FindingCategory,
    kind: FindingKind,
    findings: &[&Finding],
) -> String {
    let tier = &ctx.outcome.tier.criteria;
    let count = findings.len();
    let value = findings.first().map(|f| f.value).unwrap_or_default();

    let message = match kind {
        FindingKind::ProviderOverConcentration => format!(
            "{} storage provider(s) sealed more than {} of total datacap{}.",
            count,
            format_percentage(tier.max_provider_deal_percentage),
            relaxed(ctx)
        ),
        FindingKind::ProviderOverDuplication => format!(
            "{} storage provider(s) sealed more than {} duplicate data{}.",
            count,
            format_percentage(tier.max_duplication_percentage),
            relaxed(ctx)
        ),
        FindingKind::ProviderNoLocation => format!(
            "{} storage provider(s) have no published location.",
            count
        ),
        FindingKind::SingleRegion => {
            "All storage providers are located in the same region.".to_string()
        }
        FindingKind::LowReplicaOverage => format!(
            "{} of deals are for data replicated across {} or fewer copies, above the {} limit{}.",
            format_percentage(value),
            tier.low_replica_threshold,
            format_percentage(tier.max_percentage_for_low_replica),
            relaxed(ctx)
        ),
        FindingKind::RetrievabilityZero => format!(
            "{} of storage providers have a retrieval success rate of zero.",
            format_percentage(value)
        ),
        FindingKind::RetrievabilityLow => format!(
            "{} of storage providers have a retrieval success rate below {}.",
            format_percentage(value),
            format_percentage(ctx.low_success_rate)
        ),
        FindingKind::RetrievabilityBelowThreshold => format!(
            "The weighted average retrieval success rate is {}, below the {} threshold.",
            format_percentage(value),
            format_percentage(ctx.retrievability_threshold)
        ),
        FindingKind::CidSharingObserved => format!(
            "CID sharing has been observed with {}.",
            findings
                .iter()
                .filter_map(|f| f.subject.as_deref())
                .map(|s| format!("`{}`", s))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        FindingKind::Healthy => match category {
            FindingCategory::Replication => "Data replication looks healthy.".to_string(),
            _ => "Storage provider distribution looks healthy.".to_string(),
        },
    };

    let severity = findings
        .first()
        .map(|f| f.severity)
        .unwrap_or(Severity::Warning);
    format!("{} {}", severity.emoji(), message)
}

/// Shared headlines for a category, with per-provider lines in the full report.
fn generate_findings(builder: &mut ReportBuilder, ctx: &ReportContext<'_>, category: FindingCategory) {
    for (kind, findings) in grouped(ctx.outcome, category) {
        builder.add_shared(headline(ctx, category, kind, &findings));

        let per_item = matches!(
            kind,
            FindingKind::ProviderOverConcentration | FindingKind::ProviderOverDuplication
        );
        if per_item {
            builder.add_details(findings.iter().filter_map(|f| {
                f.subject
                    .as_ref()
                    .map(|s| format!("  - `{}`: {}", s, format_percentage(f.value)))
            }));
        } else if kind == FindingKind::ProviderNoLocation {
            builder.add_details(
                findings
                    .iter()
                    .filter_map(|f| f.subject.as_ref().map(|s| format!("  - `{}`", s))),
            );
        }
    }
}

fn generate_provider_section(builder: &mut ReportBuilder, ctx: &ReportContext<'_>) {
    let providers = &ctx.distributions.providers;

    builder.add_shared("## Storage Provider Distribution");
    builder.add_shared("");
    builder.add_shared(format!(
        "The client sealed deals with {} storage provider(s).",
        providers.len()
    ));
    builder.add_shared("");
    generate_findings(builder, ctx, FindingCategory::ProviderDistribution);

    builder.add_detail("");
    builder.add_details(provider_table(providers, ctx.retrievability));

    if providers.iter().any(|p| p.is_new_provider) {
        builder.add_detail("");
        builder.add_detail(format!(
            "{} This storage provider's first ever client is this client.",
            NEW_PROVIDER_MARKER
        ));
    }
    builder.add_shared("");
}

fn provider_table(providers: &[ProviderDistribution], retrievability: &RetrievabilitySummary) -> Vec<String> {
    let mut rows = vec![
        "| Provider | Location | Total Deals Sealed | Percentage | Unique Data | Duplicate Deals | Mean Retrieval Success Rate |".to_string(),
        "|:---|:---|---:|---:|---:|---:|---:|".to_string(),
    ];

    for p in providers {
        let marker = if p.is_new_provider {
            format!(" {}", NEW_PROVIDER_MARKER)
        } else {
            String::new()
        };
        let location = match p.location.as_ref().and_then(|l| l.org_name.as_deref()) {
            Some(org) => format!("{}<br/>`{}`", p.rendered_location(), org),
            None => p.rendered_location(),
        };
        let success = retrievability
            .success_rate_of(&p.provider)
            .map(format_percentage)
            .unwrap_or_else(|| "-".to_string());

        rows.push(format!(
            "| {}{} | {} | {} | {} | {} | {} | {} |",
            p.provider,
            marker,
            location,
            format_bytes(p.total_deal_size),
            format_percentage(p.percentage_of_client_total),
            format_bytes(p.unique_data_size),
            format_percentage(p.duplication_percentage),
            success
        ));
    }

    rows
}

fn generate_replication_section(builder: &mut ReportBuilder, ctx: &ReportContext<'_>) {
    builder.add_shared("## Deal Data Replication");
    builder.add_shared("");
    generate_findings(builder, ctx, FindingCategory::Replication);

    let replicas = &ctx.distributions.replicas;
    if replicas.is_empty() {
        builder.add_detail("");
        builder.add_detail("No active replica data was found.");
    } else {
        builder.add_detail("");
        builder.add_details(replica_table(replicas));
    }
    builder.add_shared("");
}

fn replica_table(replicas: &[ReplicaDistribution]) -> Vec<String> {
    let mut rows = vec![
        "| Number of Replicas | Unique Data Size | Total Deals Made | Deals Percentage |".to_string(),
        "|---:|---:|---:|---:|".to_string(),
    ];
    rows.extend(replicas.iter().map(|r| {
        format!(
            "| {} | {} | {} | {} |",
            r.number_of_replicas,
            format_bytes(r.unique_data_size),
            format_bytes(r.total_deal_size),
            format_percentage(r.percentage_of_client_total)
        )
    }));
    rows
}

fn generate_retrievability_section(builder: &mut ReportBuilder, ctx: &ReportContext<'_>) {
    builder.add_shared("## Retrieval Statistics");
    builder.add_shared("");

    if ctx.retrievability.per_provider.is_empty() {
        builder.add_shared(format!(
            "No retrieval statistics are available for the last {} days.",
            ctx.window_days
        ));
    } else {
        builder.add_detail(format!(
            "Weighted average retrieval success rate over the last {} days: {}",
            ctx.window_days,
            format_percentage(ctx.retrievability.weighted_average)
        ));
        builder.add_detail("");
        generate_findings(builder, ctx, FindingCategory::Retrievability);
        if ctx
            .outcome
            .in_category(FindingCategory::Retrievability)
            .next()
            .is_none()
        {
            builder.add_shared(format!(
                "{} Retrieval success rates look healthy.",
                Severity::Ok.emoji()
            ));
        }
    }
    builder.add_shared("");
}

fn generate_sharing_section(builder: &mut ReportBuilder, ctx: &ReportContext<'_>) {
    builder.add_shared("## Deal Data Shared with Other Clients");
    builder.add_shared("");

    let sharing = &ctx.distributions.sharing;
    if sharing.is_empty() {
        builder.add_shared(format!(
            "{} No CID sharing has been observed.",
            Severity::Ok.emoji()
        ));
    } else {
        generate_findings(builder, ctx, FindingCategory::CidSharing);
        builder.add_detail("");
        builder.add_details(sharing_table(sharing));
    }
    builder.add_shared("");
}

fn sharing_table(sharing: &[CidSharing]) -> Vec<String> {
    let mut rows = vec![
        "| Other Client | Application | Total Deals Affected | Unique CIDs | Verifier | Approvers |"
            .to_string(),
        "|:---|:---|---:|---:|:---|:---|".to_string(),
    ];
    rows.extend(sharing.iter().map(|s| {
        format!(
            "| `{}` | {} | {} | {} | {} | {} |",
            s.other_client_address,
            s.rendered_organization(),
            format_bytes(s.total_deal_size),
            s.unique_cid_count,
            s.rendered_verifier(),
            s.rendered_approvers()
        )
    }));
    rows
}

fn generate_footer(builder: &mut ReportBuilder) {
    builder.add_detail("---");
    builder.add_detail("");
    builder.add_detail(format!(
        "*Report generated by capcheck {}*",
        env!("CARGO_PKG_VERSION")
    ));
}

/// JSON form of any serializable report payload.
pub fn generate_json_report<T: serde::Serialize>(report: &T) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{CriteriaEvaluator, TierSelection};
    use crate::models::{Criteria, Location, Retrievability};
    use crate::report::builder::summary_is_contained;
    use chrono::TimeZone;

    fn application() -> ApplicationInfo {
        ApplicationInfo {
            client_address: "f1client".to_string(),
            organization_name: "Open Data Org".to_string(),
            verifier: "Notary".to_string(),
            issue_reference: Some("#42".to_string()),
            number_of_allocations: 2,
        }
    }

    fn distributions() -> Distributions {
        Distributions {
            providers: vec![
                ProviderDistribution {
                    provider: "f01".to_string(),
                    total_deal_size: 3.0 * 1024f64.powi(4),
                    unique_data_size: 1.5 * 1024f64.powi(4),
                    duplication_percentage: 0.5,
                    percentage_of_client_total: 0.75,
                    location: Some(Location {
                        city: "Hong Kong".to_string(),
                        region: "Central and Western".to_string(),
                        country: "HK".to_string(),
                        org_name: Some("AS1 Example".to_string()),
                        ..Default::default()
                    }),
                    is_new_provider: true,
                },
                ProviderDistribution {
                    provider: "f02".to_string(),
                    total_deal_size: 1024f64.powi(4),
                    unique_data_size: 1024f64.powi(4),
                    duplication_percentage: 0.0,
                    percentage_of_client_total: 0.25,
                    location: None,
                    is_new_provider: false,
                },
            ],
            replicas: vec![ReplicaDistribution {
                number_of_replicas: 1,
                total_deal_size: 4.0 * 1024f64.powi(4),
                unique_data_size: 4.0 * 1024f64.powi(4),
                percentage_of_client_total: 1.0,
            }],
            sharing: vec![CidSharing {
                other_client_address: "f1other".to_string(),
                total_deal_size: 2048.0,
                unique_cid_count: 4,
                other_application: None,
                approvers: None,
            }],
        }
    }

    fn retrievability() -> RetrievabilitySummary {
        RetrievabilitySummary {
            per_provider: vec![Retrievability {
                provider_id: "f01".to_string(),
                success_rate: 0.1,
                total_deal_size: 3.0,
            }],
            weighted_average: 0.1,
        }
    }

    fn render(early: bool) -> ReportDocuments {
        let app = application();
        let dists = distributions();
        let retr = retrievability();
        let evaluator = CriteriaEvaluator::new(vec![Criteria::default()], 0.2, 0.75);
        let findings = evaluator.evaluate(
            &Criteria::default(),
            &dists.providers,
            &dists.replicas,
            &retr,
            &dists.sharing,
        );
        let outcome = EvaluationOutcome {
            tier: TierSelection {
                index: 0,
                criteria: Criteria::default(),
                early_allocation: early,
            },
            findings,
        };
        let ctx = ReportContext {
            address: "f1client",
            client_id: "f0100",
            application: &app,
            distributions: &dists,
            retrievability: &retr,
            outcome: &outcome,
            retrievability_threshold: 0.2,
            low_success_rate: 0.75,
            window_days: 7,
            generated_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        };
        generate_documents(&ctx)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0.0), "0.00 B");
        assert_eq!(format_bytes(1536.0), "1.50 KiB");
        assert_eq!(format_bytes(1024f64.powi(4)), "1.00 TiB");
        assert_eq!(format_bytes(1024f64.powi(7)), "1024.00 EiB");
    }

    #[test]
    fn test_summary_contained_in_full() {
        let docs = render(false);
        assert!(summary_is_contained(&docs.summary, &docs.full));
        assert!(docs.full.len() > docs.summary.len());
    }

    #[test]
    fn test_headlines_shared_tables_detail_only() {
        let docs = render(false);
        let concentration = "⚠️ 1 storage provider(s) sealed more than 25.00% of total datacap.";
        assert!(docs.summary.contains(concentration));
        assert!(docs.full.contains(concentration));
        assert!(docs.summary.contains("⚠️ CID sharing has been observed with `f1other`."));

        assert!(!docs.summary.contains("| Provider |"));
        assert!(docs.full.contains("| f01 ⭐ | Hong Kong, Central and Western, HK<br/>`AS1 Example` | 3.00 TiB | 75.00% | 1.50 TiB | 50.00% | 10.00% |"));
        assert!(docs.full.contains("| f02 | Unknown | 1.00 TiB | 25.00% | 1.00 TiB | 0.00% | - |"));
        assert!(docs.full.contains("| `f1other` | Unknown | 2.00 KiB | 4 | Unknown | Unknown |"));
    }

    #[test]
    fn test_early_allocation_annotation() {
        let docs = render(true);
        assert!(docs.summary.contains("of total datacap (relaxed for early allocation)."));
        assert!(docs.full.contains("- **Criteria Tier:** 1 (early allocation)"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        assert_eq!(render(false), render(false));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&distributions()).unwrap();
        assert!(json.contains("\"providers\""));
        assert!(json.contains("\"is_new_provider\""));
    }
}
