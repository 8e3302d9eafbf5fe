//! Data models for the pipeline learning engine.
//!
//! This module contains the immutable records appended to the event log
//! and the statistics derived from them.

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a pipeline run or of a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Partial => write!(f, "partial"),
        }
    }
}

/// Direction of an executor's recent success rate relative to its overall rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Declining => write!(f, "declining"),
        }
    }
}

impl Trend {
    /// Returns an arrow for text reports.
    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::Improving => "↑",
            Trend::Stable => "→",
            Trend::Declining => "↓",
        }
    }
}

/// One end-to-end pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub work_item_id: String,
    pub title: String,
    pub outcome: Outcome,
    /// Wall-clock duration of the run in seconds.
    pub duration_secs: f64,
    pub phases_completed: u32,
    pub total_phases: u32,
    #[serde(default)]
    pub completed_units: Vec<String>,
    #[serde(default)]
    pub failed_units: Vec<String>,
    /// References to gate failures raised during the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_failures: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons: Option<String>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    fn validate(&self) -> Result<()> {
        require_non_empty("work_item_id", &self.work_item_id)?;
        require_duration("duration_secs", Some(self.duration_secs))?;

        if self.phases_completed > self.total_phases {
            return Err(AnalyticsError::malformed(format!(
                "phases completed ({}) exceeds total phases ({})",
                self.phases_completed, self.total_phases
            )));
        }

        if self.outcome == Outcome::Success && !self.failed_units.is_empty() {
            return Err(AnalyticsError::malformed(format!(
                "execution {} is marked success but lists {} failed units",
                self.work_item_id,
                self.failed_units.len()
            )));
        }

        Ok(())
    }

    /// Fraction of phases that ran to completion.
    pub fn completion_ratio(&self) -> Option<f64> {
        if self.total_phases == 0 {
            None
        } else {
            Some(self.phases_completed as f64 / self.total_phases as f64)
        }
    }
}

/// Outcome of one unit of work within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub work_item_id: String,
    pub unit_id: String,
    pub unit_name: String,
    /// Worker or agent role that handled the unit.
    pub executor: String,
    pub outcome: Outcome,
    pub gate_type: String,
    pub gate_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub auto_fixed: bool,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl UnitOutcome {
    fn validate(&self) -> Result<()> {
        require_non_empty("work_item_id", &self.work_item_id)?;
        require_non_empty("unit_id", &self.unit_id)?;
        require_non_empty("executor", &self.executor)?;
        require_non_empty("gate_type", &self.gate_type)?;
        require_duration("duration_secs", self.duration_secs)
    }

    /// A passed gate on a failed unit is suspicious but still recorded.
    pub fn is_inconsistent(&self) -> bool {
        self.gate_passed && self.outcome == Outcome::Failure
    }
}

/// One failed validation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    pub work_item_id: String,
    pub unit_id: String,
    pub gate_type: String,
    /// Short categorical tag used for grouping.
    pub error_pattern: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_fix: Option<String>,
    #[serde(default)]
    pub auto_fixed: bool,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl GateFailure {
    fn validate(&self, limits: &RecordLimits) -> Result<()> {
        require_non_empty("work_item_id", &self.work_item_id)?;
        require_non_empty("gate_type", &self.gate_type)?;

        let pattern = self.error_pattern.trim();
        if pattern.is_empty() {
            return Err(AnalyticsError::malformed("error_pattern must not be empty"));
        }
        if pattern.contains(['\n', '\r']) {
            return Err(AnalyticsError::malformed(
                "error_pattern must be a single-line tag",
            ));
        }
        let pattern_len = pattern.chars().count();
        if pattern_len > limits.max_pattern_len {
            return Err(AnalyticsError::malformed(format!(
                "error_pattern is {} chars, limit is {}",
                pattern_len, limits.max_pattern_len
            )));
        }

        let message_len = self.error_message.chars().count();
        if message_len > limits.max_message_len {
            return Err(AnalyticsError::malformed(format!(
                "error_message is {} chars, limit is {}",
                message_len, limits.max_message_len
            )));
        }

        Ok(())
    }
}

/// The three record kinds held by the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Execution,
    UnitOutcome,
    GateFailure,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Execution => write!(f, "execution"),
            RecordKind::UnitOutcome => write!(f, "unit_outcome"),
            RecordKind::GateFailure => write!(f, "gate_failure"),
        }
    }
}

/// A single entry of the append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Execution(ExecutionRecord),
    UnitOutcome(UnitOutcome),
    GateFailure(GateFailure),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Execution(_) => RecordKind::Execution,
            Record::UnitOutcome(_) => RecordKind::UnitOutcome,
            Record::GateFailure(_) => RecordKind::GateFailure,
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            Record::Execution(r) => r.recorded_at,
            Record::UnitOutcome(r) => r.recorded_at,
            Record::GateFailure(r) => r.recorded_at,
        }
    }

    pub fn work_item_id(&self) -> &str {
        match self {
            Record::Execution(r) => &r.work_item_id,
            Record::UnitOutcome(r) => &r.work_item_id,
            Record::GateFailure(r) => &r.work_item_id,
        }
    }

    /// Executor name, for record kinds that carry one.
    pub fn executor(&self) -> Option<&str> {
        match self {
            Record::UnitOutcome(r) => Some(&r.executor),
            _ => None,
        }
    }

    /// Gate type, for record kinds that carry one.
    pub fn gate_type(&self) -> Option<&str> {
        match self {
            Record::UnitOutcome(r) => Some(&r.gate_type),
            Record::GateFailure(r) => Some(&r.gate_type),
            Record::Execution(_) => None,
        }
    }

    /// Check the record's invariants. A record that fails here is never stored.
    pub fn validate(&self, limits: &RecordLimits) -> Result<()> {
        match self {
            Record::Execution(r) => r.validate(),
            Record::UnitOutcome(r) => r.validate(),
            Record::GateFailure(r) => r.validate(limits),
        }
    }
}

impl From<ExecutionRecord> for Record {
    fn from(record: ExecutionRecord) -> Self {
        Record::Execution(record)
    }
}

impl From<UnitOutcome> for Record {
    fn from(outcome: UnitOutcome) -> Self {
        Record::UnitOutcome(outcome)
    }
}

impl From<GateFailure> for Record {
    fn from(failure: GateFailure) -> Self {
        Record::GateFailure(failure)
    }
}

/// Size limits enforced at append time.
#[derive(Debug, Clone, Copy)]
pub struct RecordLimits {
    pub max_pattern_len: usize,
    pub max_message_len: usize,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            max_pattern_len: 64,
            max_message_len: 4000,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AnalyticsError::malformed(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn require_duration(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(secs) if !secs.is_finite() || secs < 0.0 => Err(AnalyticsError::malformed(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, secs
        ))),
        _ => Ok(()),
    }
}

/// Longest window accepted anywhere, about a century.
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// A number of days looking back from now, between 1 and [`MAX_WINDOW_DAYS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window(u32);

impl Window {
    pub fn days(days: u32) -> Result<Self> {
        if days == 0 || days > MAX_WINDOW_DAYS {
            return Err(AnalyticsError::InvalidWindow(days));
        }
        Ok(Self(days))
    }

    pub fn as_days(&self) -> u32 {
        self.0
    }

    /// Earliest timestamp inside the window ending at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.0)
    }
}

/// `now` minus whole days, saturating at the earliest representable instant.
pub fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.0)
    }
}

/// Canonical form of a free-text tag: trimmed, whitespace collapsed,
/// truncated to `max_chars` on a character boundary.
pub fn canonical_tag(raw: &str, max_chars: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => collapsed[..cut].trim_end().to_string(),
        None => collapsed,
    }
}

/// A free-text entry and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Effectiveness of one executor over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub executor: String,
    pub window_days: u32,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Rate over the recent sub-window, when it had enough samples.
    pub recent_success_rate: Option<f64>,
    pub avg_duration_secs: Option<f64>,
    pub common_issues: Vec<TagCount>,
    pub trend: Trend,
    /// Work items with a failed unit, in first-seen order.
    pub failed_work_items: Vec<String>,
}

/// Pass rate of one gate type over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    pub gate_type: String,
    pub window_days: u32,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub auto_fix_rate: f64,
    pub failure_patterns: Vec<TagCount>,
    pub failed_work_items: Vec<String>,
}

/// Roll-up of pipeline runs over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub window_days: u32,
    pub total_runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub partial: usize,
    pub success_rate: f64,
    pub avg_duration_secs: f64,
    pub avg_completion_ratio: Option<f64>,
    /// Most recent lessons, newest first.
    pub recent_lessons: Vec<String>,
}

/// Every record logged for one work item, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItemHistory {
    pub work_item_id: String,
    pub window_days: u32,
    pub records: Vec<Record>,
}

/// What a regression alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Executor,
    Gate,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Executor => write!(f, "Executor"),
            AlertKind::Gate => write!(f, "Gate"),
        }
    }
}

/// A tracked metric that fell below its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAlert {
    pub kind: AlertKind,
    pub subject: String,
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    pub decline_percentage: f64,
    pub suspected_cause: String,
    pub affected_work_items: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Executor suggested for a work-item category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: String,
    pub executor: String,
    pub confidence: f64,
    /// Advisory text for humans.
    pub rationale: String,
    pub from_history: bool,
}
