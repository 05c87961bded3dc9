//! Error types for model validation in drivelog-types.

use thiserror::Error;

/// Errors that can occur when building or parsing model values.
///
/// This error type is platform-agnostic and does not include
/// capability or persistence errors (those belong in drivelog-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Latitude or longitude outside the valid range, or not finite.
    #[error("Invalid coordinate: latitude={latitude}, longitude={longitude}")]
    InvalidCoordinate {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    /// A route status string that does not name a known status.
    #[error("Unknown route status: {0}")]
    UnknownStatus(String),

    /// An authorization state string that does not name a known state.
    #[error("Unknown authorization state: {0}")]
    UnknownAuthorization(String),

    /// Any other invalid value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using drivelog-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
