//! Error types for acknowledgment dispatch.

use std::time::Duration;
use thiserror::Error;

/// Close reason text the broker reports when an outcome arrives for a delivery
/// tag that belonged to an already closed channel.
pub const UNKNOWN_DELIVERY_TAG: &str = "PRECONDITION_FAILED - unknown delivery tag";

/// Failures surfaced to callers awaiting an outcome operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("The '{executor}' executor has been disposed")]
    Disposed { executor: String },

    #[error("The '{executor}' executor was cancelled before the work item settled")]
    Cancelled { executor: String },

    #[error("Gave up on '{executor}' after {attempts} attempts: {last_error}")]
    Exhausted {
        executor: String,
        attempts: u32,
        last_error: String,
    },

    #[error("'{executor}' failed with a non-retryable error: {detail}")]
    Rejected { executor: String, detail: String },
}

impl DispatchError {
    /// Name of the executor that produced the error
    pub fn executor(&self) -> &str {
        match self {
            Self::Disposed { executor }
            | Self::Cancelled { executor }
            | Self::Exhausted { executor, .. }
            | Self::Rejected { executor, .. } => executor,
        }
    }

    /// Check if the failure came from running out of retry budget
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Errors reported by a broker channel for acknowledge / negative-acknowledge calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Already closed: {reason}")]
    AlreadyClosed { reason: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Operation '{operation}' is not supported by this channel")]
    Unsupported { operation: String },
}

impl ChannelError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AlreadyClosed { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::Unsupported { .. } => false,
        }
    }

    /// Check if this is the broker's "unknown delivery tag" close, which means the
    /// delivery was already settled when the channel went away.
    pub fn is_unknown_delivery_tag(&self) -> bool {
        match self {
            Self::AlreadyClosed { reason } => reason.contains(UNKNOWN_DELIVERY_TAG),
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
