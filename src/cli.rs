//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// capcheck - DataCap allocation health reports
///
/// Checks how a client spreads its allocated capacity across storage
/// providers, how well its data is replicated and retrievable, and writes a
/// summary plus a full markdown report.
///
/// Examples:
///   capcheck --address f1abc...
///   capcheck --address f1abc... --output ./reports --no-upload
///   capcheck --address f1abc... --format json
///   capcheck --address f1abc... --history
///   capcheck --address f1abc... --allocator f1xyz... --latest
///   capcheck --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Client address to report on
    #[arg(short, long, value_name = "ADDRESS", required_unless_present = "init_config")]
    pub address: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .capcheck.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory to write summary.md and full-report.md into
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// List previously generated reports instead of generating one
    #[arg(long)]
    pub history: bool,

    /// Show only the most recent recorded report
    #[arg(long, conflicts_with = "history")]
    pub latest: bool,

    /// Trailing window for retrieval statistics, in days
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<u32>,

    /// Minimum acceptable weighted retrieval success rate (0.0 - 1.0)
    #[arg(long, value_name = "RATE")]
    pub retrievability_threshold: Option<f64>,

    /// SQLite database holding distribution tables and report history
    #[arg(long, value_name = "FILE", env = "CAPCHECK_DATABASE")]
    pub database: Option<PathBuf>,

    /// Record the report against this allocator instead of the client
    #[arg(long, value_name = "ADDRESS")]
    pub allocator: Option<String>,

    /// Display name of the allocator
    #[arg(long, value_name = "NAME", requires = "allocator")]
    pub allocator_name: Option<String>,

    /// Skip uploading the full report to the artifact repository
    #[arg(long)]
    pub no_upload: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .capcheck.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The client address; empty when only `--init-config` was given.
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or("")
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        let address = self.address();
        if address.len() < 2 || !address.starts_with(['f', 't']) {
            return Err("Address must be a Filecoin address starting with 'f' or 't'".to_string());
        }

        if let Some(threshold) = self.retrievability_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("Retrievability threshold must be between 0.0 and 1.0".to_string());
            }
        }

        if self.window_days == Some(0) {
            return Err("Window must be at least 1 day".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref output) = self.output {
            if output.exists() && !output.is_dir() {
                return Err(format!(
                    "Output path is not a directory: {}",
                    output.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            address: Some("f1client".to_string()),
            config: None,
            output: None,
            format: OutputFormat::Markdown,
            history: false,
            latest: false,
            window_days: None,
            retrievability_threshold: None,
            database: None,
            allocator: None,
            allocator_name: None,
            no_upload: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_valid_args() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_address() {
        let mut args = make_args();
        args.address = Some("0xabc".to_string());
        assert!(args.validate().is_err());

        args.address = Some("é".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_threshold_range() {
        let mut args = make_args();
        args.retrievability_threshold = Some(1.5);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_window() {
        let mut args = make_args();
        args.window_days = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = make_args();
        args.address = None;
        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "capcheck",
            "--address",
            "f1client",
            "--format",
            "json",
            "--window-days",
            "14",
            "--no-upload",
        ])
        .unwrap();
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.window_days, Some(14));
        assert!(args.no_upload);
    }

    #[test]
    fn test_latest_conflicts_with_history() {
        let result = Args::try_parse_from(["capcheck", "--address", "f1client", "--history", "--latest"]);
        assert!(result.is_err());

        let args = Args::try_parse_from(["capcheck", "--address", "f1client", "--latest"]).unwrap();
        assert!(args.latest);
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
