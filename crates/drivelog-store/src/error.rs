//! Error types for drivelog-store.

use std::path::PathBuf;

use uuid::Uuid;

/// Result type for drivelog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drivelog-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Route not found in database.
    #[error("Route not found: {0}")]
    RouteNotFound(Uuid),

    /// Another route is already being recorded.
    #[error("Route {0} is already active")]
    ActiveRouteExists(Uuid),

    /// The route can no longer change.
    #[error("Route {id} is already {status}")]
    RouteFinished { id: Uuid, status: String },

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A stored row could not be turned back into a route.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<drivelog_types::ParseError> for Error {
    fn from(e: drivelog_types::ParseError) -> Self {
        Self::CorruptRow(e.to_string())
    }
}

impl From<Error> for drivelog_core::Error {
    fn from(e: Error) -> Self {
        drivelog_core::Error::persistence(e.to_string())
    }
}
