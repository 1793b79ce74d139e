//! Error types for the claw-usage crate.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while selecting and aggregating task records.
#[derive(Debug, Error)]
pub enum UsageError {
    /// The requested window has its start after its end.
    #[error("invalid window: start={start}, end={end}")]
    InvalidWindow {
        /// Requested window start.
        start: DateTime<Utc>,
        /// Requested window end.
        end: DateTime<Utc>,
    },

    /// A task record could not be projected into a summary.
    #[error("malformed task record {task_id:?}: {reason}")]
    DataQuality {
        /// Task id of the offending record (may be empty).
        task_id: String,
        /// What was missing or invalid.
        reason: String,
    },

    /// The record source failed to answer a query.
    #[error("record source unavailable: {reason}")]
    SourceUnavailable {
        /// The reason the query failed.
        reason: String,
    },

    /// The record source did not answer within its time budget.
    #[error("record source timed out after {timeout_ms}ms")]
    SourceTimeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A named period could not be parsed.
    #[error("unknown time period: {name}")]
    UnknownPeriod {
        /// The unrecognized period name.
        name: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl UsageError {
    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::SourceTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for UsageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for UsageError {
    fn from(err: std::io::Error) -> Self {
        Self::SourceUnavailable {
            reason: err.to_string(),
        }
    }
}

/// Result type for usage operations.
pub type Result<T> = std::result::Result<T, UsageError>;
