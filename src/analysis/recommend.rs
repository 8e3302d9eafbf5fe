//! Executor recommendations for new work items.
//!
//! A static category table picks the executor; recorded history then
//! raises or lowers the confidence.

use super::{Aggregator, Lookup};
use crate::config::RecommendConfig;
use crate::models::{ExecutorStats, Recommendation, Trend, Window};
use std::sync::Arc;
use tracing::debug;

pub struct RecommendationEngine {
    aggregator: Arc<Aggregator>,
    settings: RecommendConfig,
    window: Window,
}

impl RecommendationEngine {
    pub fn new(aggregator: Arc<Aggregator>, settings: RecommendConfig, window: Window) -> Self {
        Self {
            aggregator,
            settings,
            window,
        }
    }

    /// Default executor for a category, ignoring history.
    pub fn executor_for(&self, category: &str) -> &str {
        let key = normalize_category(category);
        self.settings
            .categories
            .iter()
            .find(|(name, _)| normalize_category(name) == key)
            .map(|(_, executor)| executor.as_str())
            .unwrap_or(self.settings.default_executor.as_str())
    }

    pub async fn recommend(&self, category: &str) -> Recommendation {
        let executor = self.executor_for(category).to_string();
        let lookup = self.aggregator.effectiveness_for(&executor, self.window).await;

        let (confidence, rationale, from_history) = match &lookup {
            Lookup::Ready(stats) => {
                let confidence = self.adjusted_confidence(stats);
                (confidence, history_rationale(stats, confidence), true)
            }
            other => {
                let reason = other.shortfall().unwrap_or_default();
                (
                    self.settings.fallback_confidence,
                    format!(
                        "no historical data for {} ({}); using default confidence {:.2}",
                        executor, reason, self.settings.fallback_confidence
                    ),
                    false,
                )
            }
        };

        debug!(
            "Recommend {} for '{}' at confidence {:.3}",
            executor, category, confidence
        );

        Recommendation {
            category: category.to_string(),
            executor,
            confidence,
            rationale,
            from_history,
        }
    }

    /// Success rate scaled by trend, capped at 1.0 when improving.
    fn adjusted_confidence(&self, stats: &ExecutorStats) -> f64 {
        let rate = stats.success_rate;
        match stats.trend {
            Trend::Declining => rate * self.settings.declining_multiplier,
            Trend::Improving => (rate * self.settings.improving_multiplier).min(1.0),
            Trend::Stable => rate,
        }
    }
}

fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}

fn history_rationale(stats: &ExecutorStats, confidence: f64) -> String {
    let mut rationale = format!(
        "{} succeeded on {} of {} units ({:.0}%) over the last {} days",
        stats.executor,
        stats.succeeded,
        stats.total,
        stats.success_rate * 100.0,
        stats.window_days
    );

    match stats.trend {
        Trend::Declining => rationale.push_str("; warning: success rate is declining"),
        Trend::Improving => rationale.push_str("; success rate is improving"),
        Trend::Stable => {}
    }

    if confidence < 0.5 {
        rationale.push_str("; consider manual review of the assignment");
    }

    rationale
}
