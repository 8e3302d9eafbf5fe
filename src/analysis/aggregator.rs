//! Rolling statistics over the event log.
//!
//! This module computes executor effectiveness, gate pass rates and
//! pipeline summaries for a time window. The `summarize_*` functions are
//! pure; [`Aggregator`] adds store access, timeouts and caching.
//!
//! Rates are `f64` ratios of exact counts. Trend comparisons allow
//! [`RATE_EPSILON`] of slack, so a gap of exactly the threshold (16/20
//! overall against 7/10 recent) is stable rather than a move.

use super::cache::TtlCache;
use super::Lookup;
use crate::config::{AnalyticsConfig, StoreConfig};
use crate::error::{AnalyticsError, Result};
use crate::models::{
    canonical_tag, days_before, ExecutionRecord, ExecutorStats, GateFailure, GateStats, Outcome,
    PipelineSummary, Record, RecordKind, TagCount, Trend, UnitOutcome, Window, WorkItemHistory,
};
use crate::store::{EventQuery, EventStore, FieldFilter};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Slack for float noise when comparing a rate gap to a threshold.
pub const RATE_EPSILON: f64 = 1e-9;

/// Computes statistics from an injected event store.
pub struct Aggregator {
    store: Arc<dyn EventStore>,
    settings: AnalyticsConfig,
    page_size: usize,
    query_timeout: Duration,
    executor_cache: TtlCache<(String, u32), Lookup<ExecutorStats>>,
    gate_cache: TtlCache<(String, u32), Lookup<GateStats>>,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn EventStore>,
        settings: AnalyticsConfig,
        store_config: &StoreConfig,
    ) -> Self {
        let ttl = settings.cache_ttl();
        Self {
            store,
            settings,
            page_size: store_config.page_size,
            query_timeout: store_config.query_timeout(),
            executor_cache: TtlCache::new(ttl),
            gate_cache: TtlCache::new(ttl),
        }
    }

    /// Effectiveness of an executor over the window.
    pub async fn effectiveness_for(&self, executor: &str, window: Window) -> Lookup<ExecutorStats> {
        let key = (executor.to_string(), window.as_days());
        if let Some(hit) = self.executor_cache.get(&key) {
            debug!("Executor stats cache hit: {} ({})", executor, window);
            return hit;
        }

        let now = Utc::now();
        let query = EventQuery::new(RecordKind::UnitOutcome, window.since(now))
            .with_filter(FieldFilter::Executor(executor.to_string()));

        let outcomes = match self.fetch(&query).await {
            Ok(records) => unit_outcomes(records),
            Err(e) => return self.degrade("executor", executor, e),
        };

        let stats = summarize_executor(executor, outcomes, window, now, &self.settings);
        self.executor_cache.insert(key, stats.clone());
        stats
    }

    /// Pass rate of a gate type over the window.
    ///
    /// Pass and auto-fix counts come from unit outcomes; failure patterns
    /// come from the gate-failure stream.
    pub async fn gate_pass_rate_for(&self, gate_type: &str, window: Window) -> Lookup<GateStats> {
        let key = (gate_type.to_string(), window.as_days());
        if let Some(hit) = self.gate_cache.get(&key) {
            debug!("Gate stats cache hit: {} ({})", gate_type, window);
            return hit;
        }

        let since = window.since(Utc::now());
        let outcome_query = EventQuery::new(RecordKind::UnitOutcome, since)
            .with_filter(FieldFilter::GateType(gate_type.to_string()));
        let failure_query = EventQuery::new(RecordKind::GateFailure, since)
            .with_filter(FieldFilter::GateType(gate_type.to_string()));

        let fetched = futures::future::try_join(
            self.fetch(&outcome_query),
            self.fetch(&failure_query),
        )
        .await;

        let (outcomes, failures) = match fetched {
            Ok((outcomes, failures)) => (unit_outcomes(outcomes), gate_failures(failures)),
            Err(e) => return self.degrade("gate", gate_type, e),
        };

        let stats = summarize_gate(gate_type, &outcomes, failures, window, &self.settings);
        self.gate_cache.insert(key, stats.clone());
        stats
    }

    /// Roll-up of pipeline runs over the window. Not cached.
    pub async fn pipeline_summary(&self, window: Window) -> Lookup<PipelineSummary> {
        let query = EventQuery::new(RecordKind::Execution, window.since(Utc::now()));
        match self.fetch(&query).await {
            Ok(records) => summarize_pipeline(executions(records), window, &self.settings),
            Err(e) => self.degrade("pipeline", "runs", e),
        }
    }

    /// Every record of any kind for one work item, oldest first. Not cached.
    pub async fn history_for(&self, work_item_id: &str, window: Window) -> Lookup<WorkItemHistory> {
        let since = window.since(Utc::now());
        let query = |kind| {
            EventQuery::new(kind, since)
                .with_filter(FieldFilter::WorkItem(work_item_id.to_string()))
        };
        let (executions, units, failures) = (
            query(RecordKind::Execution),
            query(RecordKind::UnitOutcome),
            query(RecordKind::GateFailure),
        );

        let fetched = futures::future::try_join3(
            self.fetch(&executions),
            self.fetch(&units),
            self.fetch(&failures),
        )
        .await;

        match fetched {
            Ok((executions, units, failures)) => {
                let mut records: Vec<Record> =
                    executions.into_iter().chain(units).chain(failures).collect();
                records.sort_by_key(Record::recorded_at);
                Lookup::Ready(WorkItemHistory {
                    work_item_id: work_item_id.to_string(),
                    window_days: window.as_days(),
                    records,
                })
            }
            Err(e) => self.degrade("history", work_item_id, e),
        }
    }

    /// Run a store query under the configured budget.
    ///
    /// Dropping the query future on timeout discards any partial pages.
    async fn fetch(&self, query: &EventQuery) -> Result<Vec<Record>> {
        let query = self.store.query(query, self.page_size);
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(AnalyticsError::Timeout(self.query_timeout)),
        }
    }

    fn degrade<T>(&self, subject_kind: &str, subject: &str, err: AnalyticsError) -> Lookup<T> {
        warn!("No {} stats for {}: {}", subject_kind, subject, err);
        Lookup::from_error(err, self.settings.min_samples)
    }
}

fn unit_outcomes(records: Vec<Record>) -> Vec<UnitOutcome> {
    records
        .into_iter()
        .filter_map(|r| match r {
            Record::UnitOutcome(o) => Some(o),
            _ => None,
        })
        .collect()
}

fn gate_failures(records: Vec<Record>) -> Vec<GateFailure> {
    records
        .into_iter()
        .filter_map(|r| match r {
            Record::GateFailure(f) => Some(f),
            _ => None,
        })
        .collect()
}

fn executions(records: Vec<Record>) -> Vec<ExecutionRecord> {
    records
        .into_iter()
        .filter_map(|r| match r {
            Record::Execution(e) => Some(e),
            _ => None,
        })
        .collect()
}

/// Compute executor stats from its unit outcomes inside the window ending at `now`.
pub fn summarize_executor(
    executor: &str,
    mut outcomes: Vec<UnitOutcome>,
    window: Window,
    now: DateTime<Utc>,
    settings: &AnalyticsConfig,
) -> Lookup<ExecutorStats> {
    let total = outcomes.len();
    if total < settings.min_samples {
        return Lookup::InsufficientData {
            samples: total,
            required: settings.min_samples,
        };
    }

    // Store order is not causal; first-seen means earliest.
    outcomes.sort_by_key(|o| o.recorded_at);

    let succeeded = count_outcome(&outcomes, Outcome::Success);
    let failed = count_outcome(&outcomes, Outcome::Failure);
    let success_rate = ratio(succeeded, total);

    let recent_cutoff = days_before(now, settings.recent_days);
    let recent: Vec<&UnitOutcome> = outcomes
        .iter()
        .filter(|o| o.recorded_at >= recent_cutoff)
        .collect();
    let recent_success_rate = if recent.len() >= settings.min_recent_samples {
        let recent_succeeded = recent.iter().filter(|o| o.outcome == Outcome::Success).count();
        Some(ratio(recent_succeeded, recent.len()))
    } else {
        None
    };

    let trend = classify_trend(recent_success_rate, success_rate, settings.trend_threshold);

    let common_issues = top_tags(
        outcomes.iter().flat_map(|o| o.issues.iter().map(String::as_str)),
        settings.top_n,
        settings.max_issue_len,
    );

    let failed_work_items = distinct_in_order(
        outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::Failure)
            .map(|o| o.work_item_id.as_str()),
    );

    Lookup::Ready(ExecutorStats {
        executor: executor.to_string(),
        window_days: window.as_days(),
        total,
        succeeded,
        failed,
        success_rate,
        recent_success_rate,
        avg_duration_secs: mean(outcomes.iter().filter_map(|o| o.duration_secs)),
        common_issues,
        trend,
        failed_work_items,
    })
}

/// Compute gate stats from unit outcomes and gate failures for one gate type.
pub fn summarize_gate(
    gate_type: &str,
    outcomes: &[UnitOutcome],
    mut failures: Vec<GateFailure>,
    window: Window,
    settings: &AnalyticsConfig,
) -> Lookup<GateStats> {
    let total = outcomes.len();
    if total < settings.min_samples {
        return Lookup::InsufficientData {
            samples: total,
            required: settings.min_samples,
        };
    }

    let mut ordered: Vec<&UnitOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|o| o.recorded_at);
    failures.sort_by_key(|f| f.recorded_at);

    let passed = ordered.iter().filter(|o| o.gate_passed).count();
    let auto_fixed = ordered.iter().filter(|o| o.auto_fixed).count();

    Lookup::Ready(GateStats {
        gate_type: gate_type.to_string(),
        window_days: window.as_days(),
        total,
        passed,
        failed: total - passed,
        pass_rate: ratio(passed, total),
        auto_fix_rate: ratio(auto_fixed, total),
        failure_patterns: top_tags(
            failures.iter().map(|f| f.error_pattern.as_str()),
            settings.top_n,
            settings.max_pattern_len,
        ),
        failed_work_items: distinct_in_order(
            ordered
                .iter()
                .filter(|o| !o.gate_passed)
                .map(|o| o.work_item_id.as_str()),
        ),
    })
}

/// Roll up pipeline runs. A single run is enough for a summary.
pub fn summarize_pipeline(
    mut runs: Vec<ExecutionRecord>,
    window: Window,
    settings: &AnalyticsConfig,
) -> Lookup<PipelineSummary> {
    if runs.is_empty() {
        return Lookup::InsufficientData {
            samples: 0,
            required: 1,
        };
    }

    runs.sort_by_key(|r| r.recorded_at);
    let total_runs = runs.len();
    let succeeded = runs.iter().filter(|r| r.outcome == Outcome::Success).count();
    let failed = runs.iter().filter(|r| r.outcome == Outcome::Failure).count();

    let recent_lessons = runs
        .iter()
        .rev()
        .filter_map(|r| r.lessons.as_deref())
        .map(|l| canonical_tag(l, settings.max_issue_len))
        .filter(|l| !l.is_empty())
        .take(settings.top_n)
        .collect();

    Lookup::Ready(PipelineSummary {
        window_days: window.as_days(),
        total_runs,
        succeeded,
        failed,
        partial: total_runs - succeeded - failed,
        success_rate: ratio(succeeded, total_runs),
        avg_duration_secs: mean(runs.iter().map(|r| r.duration_secs)).unwrap_or(0.0),
        avg_completion_ratio: mean(runs.iter().filter_map(|r| r.completion_ratio())),
        recent_lessons,
    })
}

/// Classify the recent rate against the overall rate.
///
/// Without a usable recent rate the overall rate stands in, which is
/// always stable. A gap equal to the threshold is stable.
pub fn classify_trend(recent: Option<f64>, overall: f64, threshold: f64) -> Trend {
    let recent = recent.unwrap_or(overall);
    let delta = recent - overall;
    let margin = threshold + RATE_EPSILON;
    if delta > margin {
        Trend::Improving
    } else if delta < -margin {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

/// Count canonicalized tags, most frequent first, ties in first-seen order.
pub fn top_tags<'a, I>(tags: I, n: usize, max_chars: usize) -> Vec<TagCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<TagCount> = Vec::new();

    for raw in tags {
        let tag = canonical_tag(raw, max_chars);
        if tag.is_empty() {
            continue;
        }
        // Group case-insensitively, display the first spelling seen.
        match index.get(&tag.to_lowercase()) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(tag.to_lowercase(), counts.len());
                counts.push(TagCount { tag, count: 1 });
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by_key(|c| std::cmp::Reverse(c.count));
    counts.truncate(n);
    counts
}

fn count_outcome(outcomes: &[UnitOutcome], outcome: Outcome) -> usize {
    outcomes.iter().filter(|o| o.outcome == outcome).count()
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

fn distinct_in_order<'a, I: Iterator<Item = &'a str>>(items: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .filter(|item| seen.insert(*item))
        .map(String::from)
        .collect()
}
