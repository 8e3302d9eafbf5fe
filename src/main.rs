//! Loopwise - learning loop analytics for a multi-phase build pipeline
//!
//! Records execution outcomes to an append-only event log, computes
//! executor and gate statistics, detects regressions and recommends
//! executors for new work.
//!
//! Exit codes:
//!   0 - Success (including records dropped because the store is down)
//!   1 - Runtime error (bad config, unreadable input, etc.)
//!   2 - Record rejected as malformed

mod analysis;
mod cli;
mod config;
mod engine;
mod error;
mod models;
mod report;
mod store;

use anyhow::{Context, Result};
use cli::{Args, Command, OutputFormat, RecordTarget};
use config::{Config, CONFIG_FILE_NAME};
use engine::{log_recording_failure, LearningLoop};
use error::AnalyticsError;
use models::{Record, Window};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use store::JsonlStore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Config comes first so its verbose flag can raise the log level
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, config.general.verbose);

    debug!("Loopwise v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .loopwise.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize thresholds, tracked executors and categories.");
    Ok(())
}

/// Initialize logging on stderr. `RUST_LOG` overrides the -v/-q level.
fn init_logging(args: &Args, config_verbose: bool) {
    let level = if config_verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch one subcommand. Returns the process exit code.
async fn run(args: Args, mut config: Config) -> Result<i32> {
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let recording = matches!(args.command, Command::Record { .. } | Command::Import { .. });
    let store = match JsonlStore::open(&config.general.store_dir, &config.general.namespace).await
    {
        Ok(store) => store,
        Err(e) if recording => {
            log_recording_failure(&e);
            return Ok(0);
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to open store in {}", config.general.store_dir.display())
            })
        }
    };
    debug!("Event log at {}", store.path().display());

    let engine = LearningLoop::new(Arc::new(store), &config)?;

    match args.command {
        Command::Record { target, input } => {
            let raw = read_input(&input)?;
            Ok(recording_exit_code(record_typed(&engine, target, &raw).await))
        }
        Command::Import { input } => import_records(&engine, &input).await,
        Command::ExecutorStats {
            name,
            window_days,
            format,
        } => {
            let window = resolve_window(&engine, window_days)?;
            let lookup = engine.query_executor_stats(&name, window).await;
            let text = match lookup.ready() {
                Some(stats) => report::format_executor_stats(stats),
                None => format!("{}: {}\n", name, lookup.shortfall().unwrap_or_default()),
            };
            emit(&lookup, text, format)?;
            Ok(0)
        }
        Command::GateStats {
            gate,
            window_days,
            format,
        } => {
            let window = resolve_window(&engine, window_days)?;
            let lookup = engine.query_gate_stats(&gate, window).await;
            let text = match lookup.ready() {
                Some(stats) => report::format_gate_stats(stats),
                None => format!("{}: {}\n", gate, lookup.shortfall().unwrap_or_default()),
            };
            emit(&lookup, text, format)?;
            Ok(0)
        }
        Command::History {
            work_item,
            window_days,
            format,
        } => {
            let window = resolve_window(&engine, window_days)?;
            let lookup = engine.work_item_history(&work_item, window).await;
            let text = match lookup.ready() {
                Some(history) => report::format_history(history),
                None => format!("{}: {}\n", work_item, lookup.shortfall().unwrap_or_default()),
            };
            emit(&lookup, text, format)?;
            Ok(0)
        }
        Command::Regressions { format } => {
            let alerts = engine.detect_regressions().await;
            let text = report::format_regressions(&alerts);
            emit(&alerts, text, format)?;
            Ok(0)
        }
        Command::Recommend { category, format } => {
            let rec = engine.recommend_executor(&category).await;
            let text = report::format_recommendation(&rec);
            emit(&rec, text, format)?;
            Ok(0)
        }
        Command::Report {
            categories,
            format,
            output,
        } => {
            // Without explicit categories, recommend for every mapped one
            let categories = if categories.is_empty() {
                config.recommend.categories.keys().cloned().collect()
            } else {
                categories
            };

            let snapshot = engine.snapshot(&categories).await;
            let rendered = report::format_report(&snapshot, format)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &rendered).with_context(|| {
                        format!("Failed to write report to {}", path.display())
                    })?;
                    info!("Report saved to {}", path.display());
                }
                None => print!("{}", rendered),
            }
            Ok(0)
        }
        Command::InitConfig => {
            handle_init_config()?;
            Ok(0)
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("Warning: failed to load {}: {:#}", CONFIG_FILE_NAME, e);
            Ok(Config::default())
        }
    }
}

/// Read a whole input file, or stdin for `-`.
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read record from stdin")?;
        return Ok(buffer);
    }

    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Decode one JSON document; anything undecodable is a malformed record.
fn parse_json<T: DeserializeOwned>(raw: &str) -> error::Result<T> {
    serde_json::from_str(raw).map_err(|e| AnalyticsError::malformed(e.to_string()))
}

/// Decode a record of the requested shape and store it.
async fn record_typed(
    engine: &LearningLoop,
    target: RecordTarget,
    raw: &str,
) -> error::Result<()> {
    match target {
        RecordTarget::Execution => engine.record_execution(parse_json(raw)?).await,
        RecordTarget::Unit => engine.record_unit_outcome(parse_json(raw)?).await,
        RecordTarget::GateFailure => engine.record_gate_failure(parse_json(raw)?).await,
    }
}

/// Recording never fails the caller unless the record itself was bad.
fn recording_exit_code(result: error::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e @ AnalyticsError::MalformedRecord(_)) => {
            eprintln!("Rejected: {}", e);
            2
        }
        Err(e) => {
            log_recording_failure(&e);
            0
        }
    }
}

/// Import a JSONL file of kind-tagged records, one per line.
async fn import_records(engine: &LearningLoop, path: &Path) -> Result<i32> {
    let content = read_input(path)?;
    let mut imported = 0usize;
    let mut rejected = 0usize;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let result = match parse_json::<Record>(line) {
            Ok(record) => engine.record(record).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => imported += 1,
            Err(AnalyticsError::MalformedRecord(reason)) => {
                warn!("Line {} rejected: {}", index + 1, reason);
                rejected += 1;
            }
            Err(e) => {
                // The store is gone; further lines would fail the same way
                log_recording_failure(&e);
                break;
            }
        }
    }

    println!("Imported {} record(s), rejected {}", imported, rejected);
    Ok(if rejected > 0 { 2 } else { 0 })
}

fn resolve_window(engine: &LearningLoop, window_days: Option<u32>) -> Result<Window> {
    match window_days {
        Some(days) => Ok(Window::days(days)?),
        None => Ok(engine.default_window()),
    }
}

/// Print either the text rendering or the JSON form of a value.
fn emit<T: Serialize>(value: &T, text: String, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", text),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to encode output")?
        ),
    }
    Ok(())
}
