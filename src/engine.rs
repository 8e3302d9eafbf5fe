//! The learning loop: recording and querying in one place.
//!
//! This is the boundary the pipeline orchestrator talks to. Recording is
//! a side-channel: callers log failures and carry on.

use crate::analysis::{Aggregator, Lookup, RecommendationEngine, RegressionDetector};
use crate::config::Config;
use crate::error::{AnalyticsError, Result};
use crate::models::{
    ExecutionRecord, ExecutorStats, GateFailure, GateStats, PipelineSummary, Record,
    RecordLimits, RegressionAlert, Recommendation, UnitOutcome, Window, WorkItemHistory,
};
use crate::report::ReportSnapshot;
use crate::store::EventStore;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LearningLoop {
    store: Arc<dyn EventStore>,
    aggregator: Arc<Aggregator>,
    detector: RegressionDetector,
    recommender: RecommendationEngine,
    limits: RecordLimits,
    window: Window,
    tracked_executors: Vec<String>,
    tracked_gates: Vec<String>,
}

impl LearningLoop {
    /// Build the engine over an injected store.
    pub fn new(store: Arc<dyn EventStore>, config: &Config) -> Result<Self> {
        let window = Window::days(config.analytics.default_window_days)?;
        let aggregator = Arc::new(Aggregator::new(
            store.clone(),
            config.analytics.clone(),
            &config.store,
        ));

        Ok(Self {
            store,
            detector: RegressionDetector::new(
                aggregator.clone(),
                config.regression.clone(),
                window,
            ),
            recommender: RecommendationEngine::new(
                aggregator.clone(),
                config.recommend.clone(),
                window,
            ),
            aggregator,
            limits: config.analytics.record_limits(),
            window,
            tracked_executors: config.regression.tracked_executors.clone(),
            tracked_gates: config.regression.tracked_gates.clone(),
        })
    }

    /// Validate and append any record. Malformed records are never stored.
    pub async fn record(&self, record: Record) -> Result<()> {
        record.validate(&self.limits)?;

        if let Record::UnitOutcome(ref outcome) = record {
            if outcome.is_inconsistent() {
                warn!(
                    "Unit {} of {} passed gate {} but failed",
                    outcome.unit_id, outcome.work_item_id, outcome.gate_type
                );
            }
        }

        let kind = record.kind();
        let work_item = record.work_item_id().to_string();
        self.store.append(record).await?;
        info!("Recorded {} for {}", kind, work_item);
        Ok(())
    }

    pub async fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        self.record(record.into()).await
    }

    pub async fn record_unit_outcome(&self, outcome: UnitOutcome) -> Result<()> {
        self.record(outcome.into()).await
    }

    pub async fn record_gate_failure(&self, failure: GateFailure) -> Result<()> {
        self.record(failure.into()).await
    }

    pub async fn query_executor_stats(&self, name: &str, window: Window) -> Lookup<ExecutorStats> {
        self.aggregator.effectiveness_for(name, window).await
    }

    pub async fn query_gate_stats(&self, gate_type: &str, window: Window) -> Lookup<GateStats> {
        self.aggregator.gate_pass_rate_for(gate_type, window).await
    }

    pub async fn pipeline_summary(&self, window: Window) -> Lookup<PipelineSummary> {
        self.aggregator.pipeline_summary(window).await
    }

    /// Everything logged for one work item, oldest first.
    pub async fn work_item_history(
        &self,
        work_item_id: &str,
        window: Window,
    ) -> Lookup<WorkItemHistory> {
        self.aggregator.history_for(work_item_id, window).await
    }

    pub async fn detect_regressions(&self) -> Vec<RegressionAlert> {
        self.detector.detect().await
    }

    pub async fn recommend_executor(&self, category: &str) -> Recommendation {
        self.recommender.recommend(category).await
    }

    /// Default window used when the caller does not pick one.
    pub fn default_window(&self) -> Window {
        self.window
    }

    /// Gather everything the report needs over the default window.
    pub async fn snapshot(&self, categories: &[String]) -> ReportSnapshot {
        debug!(
            "Building report snapshot: {} executors, {} gates, {} categories",
            self.tracked_executors.len(),
            self.tracked_gates.len(),
            categories.len()
        );

        let executors = join_all(self.tracked_executors.iter().map(|name| async move {
            (name.clone(), self.query_executor_stats(name, self.window).await)
        }));
        let gates = join_all(self.tracked_gates.iter().map(|gate| async move {
            (gate.clone(), self.query_gate_stats(gate, self.window).await)
        }));
        let recommendations = join_all(categories.iter().map(|c| self.recommend_executor(c)));

        let (pipeline, executors, gates, regressions, recommendations) = futures::join!(
            self.pipeline_summary(self.window),
            executors,
            gates,
            self.detect_regressions(),
            recommendations
        );

        ReportSnapshot {
            generated_at: Utc::now(),
            window_days: self.window.as_days(),
            pipeline,
            executors,
            gates,
            regressions,
            recommendations,
        }
    }
}

/// Log a recording failure the way every caller should: never fatal.
pub fn log_recording_failure(err: &AnalyticsError) {
    if err.is_unavailable() {
        warn!("Analytics store unavailable, record dropped: {}", err);
    } else {
        warn!("Record rejected: {}", err);
    }
}
