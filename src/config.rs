//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.capcheck.toml` files.

use crate::models::Criteria;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file name.
pub const CONFIG_FILE: &str = ".capcheck.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// External service endpoints.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Retry budget for upstream calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Evaluation thresholds and tiers.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Relational store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Report artifact repository settings.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory the summary and full report are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_output_dir() -> String {
    "capcheck_reports".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// External service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Chain node JSON-RPC endpoint.
    #[serde(default = "default_lotus_url")]
    pub lotus_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lotus_token: Option<String>,

    /// Verified client registry API.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// IP geolocation API.
    #[serde(default = "default_geo_url")]
    pub geo_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_token: Option<String>,

    /// Retrieval statistics API.
    #[serde(default = "default_retrieval_stats_url")]
    pub retrieval_stats_url: String,

    /// Ticket system API.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Repository holding the application tickets, as `owner/repo`.
    #[serde(default = "default_github_repo")]
    pub github_repo: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            lotus_url: default_lotus_url(),
            lotus_token: None,
            registry_url: default_registry_url(),
            geo_url: default_geo_url(),
            geo_token: None,
            retrieval_stats_url: default_retrieval_stats_url(),
            github_api_url: default_github_api_url(),
            github_repo: default_github_repo(),
            github_token: None,
        }
    }
}

fn default_lotus_url() -> String {
    "https://api.node.glif.io/rpc/v1".to_string()
}

fn default_registry_url() -> String {
    "https://api.datacapstats.io/api".to_string()
}

fn default_geo_url() -> String {
    "https://ipinfo.io".to_string()
}

fn default_retrieval_stats_url() -> String {
    "https://stats.filspark.com".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_repo() -> String {
    "filecoin-project/filecoin-plus-large-datasets".to_string()
}

/// Retry budget applied to every upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: usize,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_attempts() -> usize {
    3
}

fn default_delay_ms() -> u64 {
    500
}

/// Cache sizing. A missing TTL keeps entries until evicted by capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_application_capacity")]
    pub application_capacity: usize,

    #[serde(default = "default_application_ttl")]
    pub application_ttl_seconds: u64,

    #[serde(default = "default_comments_capacity")]
    pub comments_capacity: usize,

    #[serde(default = "default_comments_ttl")]
    pub comments_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            application_capacity: default_application_capacity(),
            application_ttl_seconds: default_application_ttl(),
            comments_capacity: default_comments_capacity(),
            comments_ttl_seconds: default_comments_ttl(),
        }
    }
}

fn default_application_capacity() -> usize {
    10_000
}

fn default_application_ttl() -> u64 {
    6 * 60 * 60
}

fn default_comments_capacity() -> usize {
    2_000
}

fn default_comments_ttl() -> u64 {
    30 * 60
}

/// Evaluation thresholds and rule tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Weighted retrieval success below this raises a warning.
    #[serde(default = "default_retrievability_threshold")]
    pub retrievability_threshold: f64,

    /// Per-provider success rate counted as low.
    #[serde(default = "default_low_success_rate")]
    pub low_success_rate: f64,

    /// Trailing window of retrieval statistics, in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Tiers indexed by allocation count (first allocation uses the first tier).
    #[serde(default = "default_criteria")]
    pub criteria: Vec<Criteria>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            retrievability_threshold: default_retrievability_threshold(),
            low_success_rate: default_low_success_rate(),
            window_days: default_window_days(),
            criteria: default_criteria(),
        }
    }
}

fn default_retrievability_threshold() -> f64 {
    0.2
}

fn default_low_success_rate() -> f64 {
    0.75
}

fn default_window_days() -> u32 {
    7
}

fn default_criteria() -> Vec<Criteria> {
    vec![
        Criteria {
            max_provider_deal_percentage: 0.75,
            max_duplication_percentage: 0.20,
            low_replica_threshold: 2,
            max_percentage_for_low_replica: 0.50,
        },
        Criteria {
            max_provider_deal_percentage: 0.50,
            max_duplication_percentage: 0.20,
            low_replica_threshold: 3,
            max_percentage_for_low_replica: 0.35,
        },
        Criteria {
            max_provider_deal_percentage: 0.35,
            max_duplication_percentage: 0.20,
            low_replica_threshold: 3,
            max_percentage_for_low_replica: 0.25,
        },
        Criteria {
            max_provider_deal_percentage: 0.25,
            max_duplication_percentage: 0.20,
            low_replica_threshold: 4,
            max_percentage_for_low_replica: 0.25,
        },
    ]
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding distribution tables and report pointers.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "capcheck.db".to_string()
}

/// Report artifact repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Local git repository reports are committed to.
    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    /// Base URL for raw downloads of committed files.
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Base URL for browsing committed files.
    #[serde(default = "default_view_base_url")]
    pub view_base_url: String,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            download_base_url: default_download_base_url(),
            view_base_url: default_view_base_url(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

fn default_repo_path() -> String {
    "capcheck-reports-repo".to_string()
}

fn default_download_base_url() -> String {
    "https://raw.githubusercontent.com/capcheck/reports/main".to_string()
}

fn default_view_base_url() -> String {
    "https://github.com/capcheck/reports/blob/main".to_string()
}

fn default_author_name() -> String {
    "capcheck".to_string()
}

fn default_author_email() -> String {
    "capcheck@localhost".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output_dir = output.display().to_string();
        }
        if let Some(days) = args.window_days {
            self.evaluation.window_days = days;
        }
        if let Some(threshold) = args.retrievability_threshold {
            self.evaluation.retrievability_threshold = threshold;
        }
        if let Some(ref db) = args.database {
            self.store.database_path = db.display().to_string();
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
