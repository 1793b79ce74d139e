//! Error types for the claw-reports crate.

use thiserror::Error;

use claw_usage::UsageError;

/// Errors that can occur while scheduling and delivering reports.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Computing the statistics behind a report failed.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// A channel failed to deliver a report.
    #[error("delivery failed on {channel}: {reason}")]
    DeliveryFailed {
        /// The channel that failed.
        channel: String,
        /// The reason delivery failed.
        reason: String,
    },

    /// A report kind name could not be parsed.
    #[error("unknown report kind: {name}")]
    UnknownKind {
        /// The unrecognized name.
        name: String,
    },

    /// Reading or writing run markers failed.
    #[error("marker store error: {reason}")]
    MarkerStore {
        /// The reason the store failed.
        reason: String,
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

impl ReportError {
    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::DeliveryFailed { .. } => true,
            Self::Usage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ReportError {
    fn from(err: std::io::Error) -> Self {
        Self::MarkerStore {
            reason: err.to_string(),
        }
    }
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;
