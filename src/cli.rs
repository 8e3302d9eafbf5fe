//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::MAX_WINDOW_DAYS;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Loopwise - learning loop analytics for a multi-phase build pipeline
///
/// Records execution outcomes, reports executor and gate statistics,
/// flags regressions and recommends executors for new work.
///
/// Examples:
///   loopwise record unit --input outcome.json
///   loopwise executor-stats backend-builder --window-days 30
///   loopwise recommend database
///   loopwise history WI-42 --format json
///   loopwise report --category database --category ui --format json
///   loopwise init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .loopwise.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding the event logs
    #[arg(long, value_name = "DIR", env = "LOOPWISE_STORE_DIR", global = true)]
    pub store_dir: Option<PathBuf>,

    /// Event log namespace, one file per namespace
    #[arg(long, value_name = "NS", env = "LOOPWISE_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Store query budget in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    pub query_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Record a single JSON record
    Record {
        #[arg(value_enum)]
        target: RecordTarget,

        /// Input file, or - for stdin
        #[arg(short, long, value_name = "FILE", default_value = "-")]
        input: PathBuf,
    },

    /// Import a JSONL file of kind-tagged records
    Import {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Show effectiveness stats for one executor
    ExecutorStats {
        name: String,

        /// Window in days (default from config)
        #[arg(long, value_name = "DAYS", value_parser = window_days_parser())]
        window_days: Option<u32>,

        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,
    },

    /// Show pass-rate stats for one gate
    GateStats {
        gate: String,

        /// Window in days (default from config)
        #[arg(long, value_name = "DAYS", value_parser = window_days_parser())]
        window_days: Option<u32>,

        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,
    },

    /// List every record logged for one work item
    History {
        work_item: String,

        /// Window in days (default from config)
        #[arg(long, value_name = "DAYS", value_parser = window_days_parser())]
        window_days: Option<u32>,

        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,
    },

    /// Check tracked executors and gates against their baselines
    Regressions {
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,
    },

    /// Recommend an executor for a work category
    Recommend {
        category: String,

        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,
    },

    /// Produce the full learning loop report
    Report {
        /// Categories to recommend executors for (repeatable)
        #[arg(long = "category", value_name = "CATEGORY")]
        categories: Vec<String>,

        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,

        /// Write the report here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Generate a default .loopwise.toml configuration file
    InitConfig,
}

/// Which record shape `record` expects on its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RecordTarget {
    Execution,
    Unit,
    GateFailure,
}

/// Output format for reports and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain text (default)
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

fn window_days_parser() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(1..=i64::from(MAX_WINDOW_DAYS))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.query_timeout_ms {
            if timeout == 0 {
                return Err("Query timeout must be at least 1 ms".to_string());
            }
        }

        if let Some(ref namespace) = self.namespace {
            if namespace.trim().is_empty() {
                return Err("Namespace must not be empty".to_string());
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
            config: None,
            verbose: false,
            quiet: false,
            store_dir: None,
            namespace: None,
            query_timeout_ms: None,
            command: Command::Regressions {
                format: OutputFormat::Text,
            },
        }
    }

    #[test]
    fn test_parse_report_command() {
        let args = Args::try_parse_from([
            "loopwise",
            "report",
            "--category",
            "database",
            "--category",
            "ui",
            "--format",
            "json",
        ])
        .unwrap();

        match args.command {
            Command::Report {
                categories,
                format,
                output,
            } => {
                assert_eq!(categories, vec!["database", "ui"]);
                assert_eq!(format, OutputFormat::Json);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_record_defaults_to_stdin() {
        let args = Args::try_parse_from(["loopwise", "record", "gate-failure"]).unwrap();
        match args.command {
            Command::Record { target, input } => {
                assert_eq!(target, RecordTarget::GateFailure);
                assert_eq!(input, PathBuf::from("-"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = Args::try_parse_from([
            "loopwise",
            "executor-stats",
            "backend-builder",
            "--window-days",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_window_rejected() {
        let result = Args::try_parse_from([
            "loopwise",
            "gate-stats",
            "lint",
            "--window-days",
            "4294967295",
        ]);
        assert!(result.is_err());

        let widest = MAX_WINDOW_DAYS.to_string();
        let args = Args::try_parse_from([
            "loopwise",
            "gate-stats",
            "lint",
            "--window-days",
            widest.as_str(),
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::GateStats { window_days: Some(MAX_WINDOW_DAYS), .. }
        ));
    }

    #[test]
    fn test_parse_history_command() {
        let args = Args::try_parse_from(["loopwise", "history", "WI-42", "--window-days", "7"])
            .unwrap();
        match args.command {
            Command::History {
                work_item,
                window_days,
                format,
            } => {
                assert_eq!(work_item, "WI-42");
                assert_eq!(window_days, Some(7));
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["loopwise", "recommend", "rls", "--namespace", "ci", "-v"])
            .unwrap();
        assert_eq!(args.namespace.as_deref(), Some("ci"));
        assert!(args.verbose);
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut args = make_args();
        args.query_timeout_ms = Some(0);
        assert!(args.validate().is_err());

        args.query_timeout_ms = Some(250);
        assert!(args.validate().is_ok());
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
