//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.loopwise.toml` files. Every threshold the engine applies is a
//! tunable here rather than a constant in code.

use crate::models::{RecordLimits, MAX_WINDOW_DAYS};
use crate::store::is_valid_namespace;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".loopwise.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Event store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Aggregation settings.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Regression detection settings.
    #[serde(default)]
    pub regression: RegressionConfig,

    /// Executor recommendation settings.
    #[serde(default)]
    pub recommend: RecommendConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding the event logs.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Tenant namespace; selects the log file.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            namespace: default_namespace(),
            verbose: false,
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".loopwise")
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Event store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Budget for a single aggregate query, in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Records fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            page_size: default_page_size(),
        }
    }
}

impl StoreConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_page_size() -> usize {
    500
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Fewer samples than this yields "insufficient data".
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Length of the recent sub-window used for trends.
    #[serde(default = "default_recent_days")]
    pub recent_days: u32,

    /// Recent sub-window needs at least this many samples to count.
    #[serde(default = "default_min_recent_samples")]
    pub min_recent_samples: usize,

    /// Window used by the detector, the recommender and the report.
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Rate difference that separates a trend from noise.
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,

    /// Number of issues or patterns listed per subject.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// How long computed stats are reused.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Issue text is cut to this many characters before grouping.
    #[serde(default = "default_max_issue_len")]
    pub max_issue_len: usize,

    /// Longest accepted gate error pattern.
    #[serde(default = "default_max_pattern_len")]
    pub max_pattern_len: usize,

    /// Longest accepted gate error message.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            recent_days: default_recent_days(),
            min_recent_samples: default_min_recent_samples(),
            default_window_days: default_window_days(),
            trend_threshold: default_trend_threshold(),
            top_n: default_top_n(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_issue_len: default_max_issue_len(),
            max_pattern_len: default_max_pattern_len(),
            max_message_len: default_max_message_len(),
        }
    }
}

impl AnalyticsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn record_limits(&self) -> RecordLimits {
        RecordLimits {
            max_pattern_len: self.max_pattern_len,
            max_message_len: self.max_message_len,
        }
    }
}

fn default_min_samples() -> usize {
    3
}

fn default_recent_days() -> u32 {
    30
}

fn default_min_recent_samples() -> usize {
    2
}

fn default_window_days() -> u32 {
    90
}

fn default_trend_threshold() -> f64 {
    0.10
}

fn default_top_n() -> usize {
    5
}

fn default_cache_ttl_secs() -> u64 {
    900 // 15 min
}

fn default_max_issue_len() -> usize {
    200
}

fn default_max_pattern_len() -> usize {
    64
}

fn default_max_message_len() -> usize {
    4000
}

/// Regression detection settings.
///
/// Baselines are static policy values, not derived from history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// Declining executors below this success rate raise an alert.
    #[serde(default = "default_executor_alert_below")]
    pub executor_alert_below: f64,

    #[serde(default = "default_executor_baseline")]
    pub executor_baseline: f64,

    /// Gates below this pass rate raise an alert.
    #[serde(default = "default_gate_alert_below")]
    pub gate_alert_below: f64,

    #[serde(default = "default_gate_baseline")]
    pub gate_baseline: f64,

    /// Executors checked, in alert order.
    #[serde(default = "default_tracked_executors")]
    pub tracked_executors: Vec<String>,

    /// Gates checked, in alert order.
    #[serde(default = "default_tracked_gates")]
    pub tracked_gates: Vec<String>,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            executor_alert_below: default_executor_alert_below(),
            executor_baseline: default_executor_baseline(),
            gate_alert_below: default_gate_alert_below(),
            gate_baseline: default_gate_baseline(),
            tracked_executors: default_tracked_executors(),
            tracked_gates: default_tracked_gates(),
        }
    }
}

fn default_executor_alert_below() -> f64 {
    0.70
}

fn default_executor_baseline() -> f64 {
    0.85
}

fn default_gate_alert_below() -> f64 {
    0.80
}

fn default_gate_baseline() -> f64 {
    0.90
}

fn default_tracked_executors() -> Vec<String> {
    vec![
        "backend-builder",
        "frontend-builder",
        "security-specialist",
        "test-engineer",
        "general-builder",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_tracked_gates() -> Vec<String> {
    vec!["typecheck", "lint", "test", "build"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Executor recommendation settings.
///
/// The multipliers are heuristics carried over as tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendConfig {
    /// Executor used for categories missing from the table.
    #[serde(default = "default_executor")]
    pub default_executor: String,

    /// Confidence reported when no history is available.
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,

    #[serde(default = "default_declining_multiplier")]
    pub declining_multiplier: f64,

    #[serde(default = "default_improving_multiplier")]
    pub improving_multiplier: f64,

    /// Work-item category to executor.
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, String>,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            default_executor: default_executor(),
            fallback_confidence: default_fallback_confidence(),
            declining_multiplier: default_declining_multiplier(),
            improving_multiplier: default_improving_multiplier(),
            categories: default_categories(),
        }
    }
}

fn default_executor() -> String {
    "general-builder".to_string()
}

fn default_fallback_confidence() -> f64 {
    0.80
}

fn default_declining_multiplier() -> f64 {
    0.85
}

fn default_improving_multiplier() -> f64 {
    1.10
}

fn default_categories() -> BTreeMap<String, String> {
    [
        ("database", "backend-builder"),
        ("api", "backend-builder"),
        ("migration", "backend-builder"),
        ("rls", "security-specialist"),
        ("auth", "security-specialist"),
        ("ui", "frontend-builder"),
        ("component", "frontend-builder"),
        ("test", "test-engineer"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
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
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.store_dir {
            self.general.store_dir = dir.clone();
        }
        if let Some(ref namespace) = args.namespace {
            self.general.namespace = namespace.clone();
        }
        if let Some(timeout) = args.query_timeout_ms {
            self.store.query_timeout_ms = timeout;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_namespace(&self.general.namespace) {
            bail!(
                "general.namespace {:?} may only contain letters, digits, '-' or '_'",
                self.general.namespace
            );
        }

        let a = &self.analytics;
        if a.min_samples == 0 {
            bail!("analytics.min_samples must be at least 1");
        }
        for (name, days) in [
            ("analytics.default_window_days", a.default_window_days),
            ("analytics.recent_days", a.recent_days),
        ] {
            if days == 0 || days > MAX_WINDOW_DAYS {
                bail!(
                    "{} must be between 1 and {} days, got {}",
                    name,
                    MAX_WINDOW_DAYS,
                    days
                );
            }
        }
        if a.top_n == 0 {
            bail!("analytics.top_n must be at least 1");
        }
        if self.store.page_size == 0 {
            bail!("store.page_size must be at least 1");
        }
        if self.store.query_timeout_ms == 0 {
            bail!("store.query_timeout_ms must be at least 1");
        }

        let r = &self.regression;
        let rates = [
            ("analytics.trend_threshold", a.trend_threshold),
            ("regression.executor_alert_below", r.executor_alert_below),
            ("regression.gate_alert_below", r.gate_alert_below),
            (
                "recommend.fallback_confidence",
                self.recommend.fallback_confidence,
            ),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0.0 and 1.0, got {}", name, value);
            }
        }

        for (name, value) in [
            ("regression.executor_baseline", r.executor_baseline),
            ("regression.gate_baseline", r.gate_baseline),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                bail!("{} must be in (0.0, 1.0], got {}", name, value);
            }
        }

        for (name, value) in [
            (
                "recommend.declining_multiplier",
                self.recommend.declining_multiplier,
            ),
            (
                "recommend.improving_multiplier",
                self.recommend.improving_multiplier,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, value);
            }
        }

        if self.recommend.default_executor.trim().is_empty() {
            bail!("recommend.default_executor must not be empty");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
