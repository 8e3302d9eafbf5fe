//! Analysis modules.
//!
//! Statistics over the event log, and the regression detector and
//! recommendation engine built on them.

pub mod aggregator;
pub mod cache;
pub mod recommend;
pub mod regression;

pub use aggregator::Aggregator;
pub use recommend::RecommendationEngine;
pub use regression::RegressionDetector;

use crate::error::AnalyticsError;
use serde::Serialize;

/// Result of an aggregate query.
///
/// Callers must branch on all three states; none of them is fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Lookup<T> {
    /// Enough samples were found.
    Ready(T),
    /// Too few samples for a meaningful rate.
    InsufficientData { samples: usize, required: usize },
    /// The store could not be read.
    Unavailable { reason: String },
}

impl<T> Lookup<T> {
    /// Degrade a store error into a result state.
    ///
    /// Timeouts count as missing data; anything else means the store is down.
    pub fn from_error(err: AnalyticsError, required: usize) -> Self {
        match err {
            AnalyticsError::Timeout(_) => Lookup::InsufficientData {
                samples: 0,
                required,
            },
            other => Lookup::Unavailable {
                reason: other.to_string(),
            },
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Lookup::Ready(value) => Some(value),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        matches!(self, Lookup::Ready(_))
    }

    /// Short human-readable reason for a non-ready state.
    pub fn shortfall(&self) -> Option<String> {
        match self {
            Lookup::Ready(_) => None,
            Lookup::InsufficientData { samples, required } => Some(format!(
                "insufficient data ({} of {} samples)",
                samples, required
            )),
            Lookup::Unavailable { reason } => Some(format!("store unavailable: {}", reason)),
        }
    }
}
