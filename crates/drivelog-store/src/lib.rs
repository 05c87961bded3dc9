//! Local route storage for the drivelog driving journal.
//!
//! This crate provides SQLite-based storage for recorded drives and
//! implements [`drivelog_core::RoutePersistence`] so the session controller
//! can write to it directly.
//!
//! # Features
//!
//! - Routes and their ordered waypoints, reloaded exactly as written
//! - Crash-safe incremental updates (one transaction per write)
//! - Queries by status and time range, with pagination
//! - Route statistics
//! - JSON export/import and per-route CSV waypoint export
//!
//! # Example
//!
//! ```no_run
//! use drivelog_store::{RouteQuery, RouteStore};
//!
//! let store = RouteStore::open_default()?;
//!
//! for summary in store.list_summaries(&RouteQuery::new().limit(10))? {
//!     println!("{} {}", summary.start_time, summary.status);
//! }
//! # Ok::<(), drivelog_store::Error>(())
//! ```

mod error;
mod export;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use export::{EXPORT_VERSION, ExportDocument};
pub use models::{ImportResult, RouteStats, RouteSummary};
pub use queries::RouteQuery;
pub use store::RouteStore;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/drivelog/routes.db`
/// - macOS: `~/Library/Application Support/drivelog/routes.db`
/// - Windows: `C:\Users\<user>\AppData\Local\drivelog\routes.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("drivelog")
        .join("routes.db")
}
