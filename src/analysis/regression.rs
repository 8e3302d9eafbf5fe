//! Regression detection against fixed baselines.

use super::{Aggregator, Lookup};
use crate::config::RegressionConfig;
use crate::models::{AlertKind, ExecutorStats, GateStats, RegressionAlert, Trend, Window};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Cause reported when no issue or pattern was recorded.
pub const UNKNOWN_CAUSE: &str = "Unknown";

pub struct RegressionDetector {
    aggregator: Arc<Aggregator>,
    settings: RegressionConfig,
    window: Window,
}

impl RegressionDetector {
    pub fn new(aggregator: Arc<Aggregator>, settings: RegressionConfig, window: Window) -> Self {
        Self {
            aggregator,
            settings,
            window,
        }
    }

    /// Check every tracked executor, then every tracked gate.
    ///
    /// Alerts are not deduplicated across calls; a metric keeps alerting
    /// until it recovers.
    pub async fn detect(&self) -> Vec<RegressionAlert> {
        let detected_at = Utc::now();

        let executor_stats = join_all(
            self.settings
                .tracked_executors
                .iter()
                .map(|name| self.aggregator.effectiveness_for(name, self.window)),
        )
        .await;
        let gate_stats = join_all(
            self.settings
                .tracked_gates
                .iter()
                .map(|gate| self.aggregator.gate_pass_rate_for(gate, self.window)),
        )
        .await;

        let mut alerts: Vec<RegressionAlert> = executor_stats
            .iter()
            .filter_map(Lookup::ready)
            .filter_map(|stats| self.executor_alert(stats, detected_at))
            .collect();
        alerts.extend(
            gate_stats
                .iter()
                .filter_map(Lookup::ready)
                .filter_map(|stats| self.gate_alert(stats, detected_at)),
        );

        if alerts.is_empty() {
            debug!("No regressions detected over {}", self.window);
        } else {
            info!("Detected {} regression(s) over {}", alerts.len(), self.window);
        }
        alerts
    }

    fn executor_alert(
        &self,
        stats: &ExecutorStats,
        detected_at: DateTime<Utc>,
    ) -> Option<RegressionAlert> {
        let below = stats.success_rate < self.settings.executor_alert_below;
        if stats.trend != Trend::Declining || !below {
            return None;
        }

        Some(RegressionAlert {
            kind: AlertKind::Executor,
            subject: stats.executor.clone(),
            metric: "success_rate".to_string(),
            baseline: self.settings.executor_baseline,
            current: stats.success_rate,
            decline_percentage: decline_percentage(
                self.settings.executor_baseline,
                stats.success_rate,
            ),
            suspected_cause: stats
                .common_issues
                .first()
                .map(|c| c.tag.clone())
                .unwrap_or_else(|| UNKNOWN_CAUSE.to_string()),
            affected_work_items: stats.failed_work_items.clone(),
            detected_at,
        })
    }

    fn gate_alert(&self, stats: &GateStats, detected_at: DateTime<Utc>) -> Option<RegressionAlert> {
        if stats.pass_rate >= self.settings.gate_alert_below {
            return None;
        }

        Some(RegressionAlert {
            kind: AlertKind::Gate,
            subject: stats.gate_type.clone(),
            metric: "pass_rate".to_string(),
            baseline: self.settings.gate_baseline,
            current: stats.pass_rate,
            decline_percentage: decline_percentage(self.settings.gate_baseline, stats.pass_rate),
            suspected_cause: stats
                .failure_patterns
                .first()
                .map(|c| c.tag.clone())
                .unwrap_or_else(|| UNKNOWN_CAUSE.to_string()),
            affected_work_items: stats.failed_work_items.clone(),
            detected_at,
        })
    }
}

/// Percentage drop from the baseline. The baseline is validated as positive.
pub fn decline_percentage(baseline: f64, current: f64) -> f64 {
    (baseline - current) / baseline * 100.0
}
