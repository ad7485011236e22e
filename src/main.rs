//! capcheck - DataCap allocation health reports
//!
//! A CLI tool that checks how a client distributes and replicates its
//! allocated capacity and produces a summary and a full markdown report.
//!
//! Exit codes:
//!   0 - Report generated
//!   1 - Runtime error (config, database, wiring, etc.)
//!   2 - Run ended with an error document (no application, no deals, ...)

mod cache;
mod cli;
mod config;
mod criteria;
mod distribution;
mod error;
mod models;
mod pipeline;
mod report;
mod resolver;
mod retrievability;
mod retry;
mod store;
mod upstream;

use anyhow::{Context, Result};
use cache::TtlCache;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use criteria::CriteriaEvaluator;
use indicatif::{ProgressBar, ProgressStyle};
use models::ApplicationInfo;
use pipeline::{AllocatorIdentity, Collaborators, PipelineOutput, ReportPipeline};
use retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{GitArtifactStore, SqliteStore};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use upstream::{
    ArtifactStore, GeoClient, GitHubTickets, IssueComment, LotusClient, RegistryClient,
    RetrievalStatsClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("capcheck v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .capcheck.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set endpoints, criteria tiers and the artifact repository.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one command. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let pipeline = build_pipeline(&config, args.no_upload)?;
    let address = args.address().to_string();

    if args.history || args.latest {
        return print_history(&pipeline, &args).await;
    }

    let spinner = spinner(args.quiet, &format!("Checking {}", address));
    let output = match args.allocator {
        Some(ref allocator) => {
            let identity = AllocatorIdentity {
                address: allocator.clone(),
                name: args.allocator_name.clone().unwrap_or_else(|| allocator.clone()),
            };
            pipeline.run_for_allocator(&address, &identity).await
        }
        None => pipeline.run(&address).await,
    };
    spinner.finish_and_clear();

    let output_dir = PathBuf::from(&config.general.output_dir);
    write_output(&output, &output_dir, args.format)?;

    if !args.quiet {
        match &output {
            PipelineOutput::Report(report) => {
                let warnings = report.evaluation.warnings().count();
                println!("\n📊 Report for {}", report.application.organization_name);
                println!("   Providers: {}", report.distributions.providers.len());
                println!("   Warnings: {}", warnings);
                if let Some(ref artifact) = report.artifact {
                    println!("   Full report: {}", artifact.view_url);
                }
            }
            PipelineOutput::ErrorDocument { markdown } => {
                println!("\n{}", markdown);
            }
        }
        println!(
            "\n✅ Done in {:.1}s. Output written to: {}",
            start_time.elapsed().as_secs_f64(),
            output_dir.display()
        );
    }

    Ok(output.exit_code())
}

fn spinner(quiet: bool, message: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Write summary and full report, or the error document, into `dir`.
fn write_output(output: &PipelineOutput, dir: &Path, format: OutputFormat) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let write = |name: &str, content: &str| -> Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    };

    match format {
        OutputFormat::Json => write("report.json", &report::generate_json_report(output)?),
        OutputFormat::Markdown => match output {
            PipelineOutput::Report(report) => {
                write("summary.md", &report.documents.summary)?;
                write("full-report.md", &report.documents.full)
            }
            PipelineOutput::ErrorDocument { .. } => write("summary.md", output.summary()),
        },
    }
}

/// Print recorded reports; only the newest one with `--latest`.
async fn print_history(pipeline: &ReportPipeline, args: &Args) -> Result<i32> {
    if let Some(ref allocator) = args.allocator {
        let records = if args.latest {
            pipeline
                .latest_allocator(allocator)
                .await
                .map(|latest| latest.into_iter().collect::<Vec<_>>())
        } else {
            pipeline.allocator_history(allocator).await
        }
        .context("Failed to read allocator report history")?;
        match args.format {
            OutputFormat::Json => println!("{}", report::generate_json_report(&records)?),
            OutputFormat::Markdown => {
                for record in &records {
                    println!(
                        "- {} [{}]({})",
                        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        record.name,
                        record.url
                    );
                }
            }
        }
        return Ok(0);
    }

    let records = if args.latest {
        pipeline
            .latest(args.address())
            .await
            .map(|latest| latest.into_iter().collect::<Vec<_>>())
    } else {
        pipeline.history(args.address()).await
    }
    .context("Failed to read report history")?;
    match args.format {
        OutputFormat::Json => println!("{}", report::generate_json_report(&records)?),
        OutputFormat::Markdown => {
            if records.is_empty() {
                println!("No reports recorded for {}", args.address());
            }
            for record in &records {
                println!(
                    "- {} {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    record.file_path
                );
            }
        }
    }
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Wire the HTTP clients, the store and the caches into a pipeline.
fn build_pipeline(config: &Config, no_upload: bool) -> Result<ReportPipeline> {
    let endpoints = &config.endpoints;
    let http = upstream::http_client(config.general.timeout_seconds)
        .context("Failed to build HTTP client")?;

    let store = Arc::new(
        SqliteStore::open(Path::new(&config.store.database_path)).with_context(|| {
            format!("Failed to open database {}", config.store.database_path)
        })?,
    );

    let lotus = Arc::new(LotusClient::new(
        http.clone(),
        endpoints.lotus_url.clone(),
        endpoints.lotus_token.clone(),
    ));

    let comments_cache: Arc<TtlCache<String, Vec<IssueComment>>> = Arc::new(TtlCache::new(
        config.cache.comments_capacity,
        ttl(config.cache.comments_ttl_seconds),
    ));
    let application_cache: Arc<TtlCache<String, Option<ApplicationInfo>>> = Arc::new(TtlCache::new(
        config.cache.application_capacity,
        ttl(config.cache.application_ttl_seconds),
    ));

    let artifacts: Option<Arc<dyn ArtifactStore>> = if no_upload {
        None
    } else {
        Some(Arc::new(GitArtifactStore::from(&config.artifacts)))
    };

    let collaborators = Collaborators {
        addresses: lotus.clone(),
        applications: Arc::new(RegistryClient::new(http.clone(), endpoints.registry_url.clone())),
        provider_info: lotus,
        geo: Arc::new(GeoClient::new(
            http.clone(),
            endpoints.geo_url.clone(),
            endpoints.geo_token.clone(),
        )),
        retrieval_stats: Arc::new(RetrievalStatsClient::new(
            http.clone(),
            endpoints.retrieval_stats_url.clone(),
        )),
        distributions: store.clone(),
        tickets: Arc::new(GitHubTickets::new(
            http,
            endpoints.github_api_url.clone(),
            endpoints.github_repo.clone(),
            endpoints.github_token.clone(),
            comments_cache,
        )),
        artifacts,
        reports: store,
    };

    Ok(ReportPipeline::new(
        collaborators,
        application_cache,
        CriteriaEvaluator::from(&config.evaluation),
        RetryPolicy::from(&config.retry),
        config.evaluation.window_days,
    ))
}

/// Zero means entries never expire.
fn ttl(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}
