//! Error types for drivelog-core.
//!
//! This module defines all error types that can occur while acquiring
//! locations, resolving addresses, and persisting routes.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::Timeout`] | Retry (see [`crate::retry`]) | Weak GPS signal, cold start |
//! | [`Error::Superseded`] | Do not retry | A newer request already waits for the fix |
//! | [`Error::Unavailable`] | Log, do not retry | Hardware or subsystem fault |
//! | [`Error::PermissionDenied`] | Do not retry | Needs a settings change outside the app |
//! | [`Error::ResolutionUnavailable`] | Recovered locally | Address resolver falls back to a heuristic |
//! | [`Error::Persistence`] | Ignore while tracking, surface at the end | A single lost flush is rewritten by the next one |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//!
//! ## Recommended Timeouts
//!
//! | Operation | Recommended Timeout | Notes |
//! |-----------|---------------------|-------|
//! | One-shot fix | 5-15 seconds | Cold GPS starts can take longer |
//! | Reverse geocoding | 5 seconds | Label falls back to the region table |
//! | End-of-drive fix (per attempt) | 5 seconds | Three attempts before manual input |
//!
//! Invalid state transitions (starting while a drive is active, ending
//! while idle) are not errors: the controller treats them as no-ops.

use std::time::Duration;

use thiserror::Error;

use drivelog_types::AuthorizationState;

/// Errors produced by the tracking engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Location permission is missing and cannot be requested from inside the app.
    #[error("Location permission denied ({0})")]
    PermissionDenied(AuthorizationState),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Location hardware or subsystem fault.
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    /// A newer one-shot request replaced this one before a fix arrived.
    #[error("Location request superseded by a newer request")]
    Superseded,

    /// Reverse geocoding failed.
    #[error("Address resolution unavailable: {0}")]
    ResolutionUnavailable(String),

    /// Route persistence failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A model value failed validation.
    #[error(transparent)]
    Parse(#[from] drivelog_types::ParseError),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a location-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the caller may try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias using drivelog-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::timeout("request_once", Duration::from_secs(5));
        assert!(err.to_string().contains("request_once"));
        assert!(err.to_string().contains("5s"));

        let err = Error::PermissionDenied(AuthorizationState::Denied);
        assert_eq!(err.to_string(), "Location permission denied (denied)");

        let err = Error::persistence("disk full");
        assert_eq!(err.to_string(), "Persistence failed: disk full");
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(Error::timeout("fix", Duration::from_secs(1)).is_retryable());
        assert!(!Error::PermissionDenied(AuthorizationState::Restricted).is_retryable());
        assert!(!Error::unavailable("gps off").is_retryable());
        assert!(!Error::Superseded.is_retryable());
        assert!(!Error::persistence("x").is_retryable());
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = drivelog_types::Coordinate::new(120.0, 0.0).unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
