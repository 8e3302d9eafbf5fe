//! Error types for the analytics engine.
//!
//! Only genuine failures live here. Not having enough samples is a
//! valid result state and is modelled by [`crate::analysis::Lookup`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors raised by the event store and the recording path.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// The backing event log could not be reached.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(String),

    /// A record violates an invariant and was not stored.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A store query exceeded the caller's budget.
    #[error("store query timed out after {0:?}")]
    Timeout(Duration),

    /// A time window outside 1..=36500 days was requested.
    #[error("invalid window of {0} days: must be between 1 and 36500")]
    InvalidWindow(u32),

    /// A record could not be encoded for the log.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalyticsError {
    /// Shorthand for building a [`AnalyticsError::MalformedRecord`].
    pub fn malformed(message: impl Into<String>) -> Self {
        AnalyticsError::MalformedRecord(message.into())
    }

    /// Returns true when the failure means the analytics side-channel is
    /// down rather than the input being wrong.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::StoreUnavailable(_) | AnalyticsError::Timeout(_)
        )
    }
}
