//! Query builder for stored routes.
//!
//! # Example
//!
//! ```
//! use drivelog_store::{RouteQuery, RouteStore};
//! use drivelog_types::RouteStatus;
//! use time::{Duration, OffsetDateTime};
//!
//! let store = RouteStore::open_in_memory()?;
//! let last_week = OffsetDateTime::now_utc() - Duration::days(7);
//!
//! let query = RouteQuery::new()
//!     .status(RouteStatus::Completed)
//!     .since(last_week)
//!     .limit(20);
//!
//! let routes = store.query_routes(&query)?;
//! assert!(routes.is_empty());
//! # Ok::<(), drivelog_store::Error>(())
//! ```

use time::OffsetDateTime;

use drivelog_types::RouteStatus;

use crate::models::to_nanos;

/// Fluent query builder for routes.
///
/// Use this with [`RouteStore::query_routes`](crate::RouteStore::query_routes),
/// [`RouteStore::list_summaries`](crate::RouteStore::list_summaries), and the
/// export methods. By default, results are ordered by start time descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct RouteQuery {
    /// Filter by status.
    pub status: Option<RouteStatus>,
    /// Include only routes started at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only routes started at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by start time descending (newest first).
    pub newest_first: bool,
}

impl RouteQuery {
    /// Create a new query: all routes, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only routes with this status.
    pub fn status(mut self, status: RouteStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only routes started at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Only routes started at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order by oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = self.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(since) = self.since {
            conditions.push("start_time >= ?");
            params.push(Box::new(to_nanos(since)));
        }

        if let Some(until) = self.until {
            conditions.push("start_time <= ?");
            params.push(Box::new(to_nanos(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// ORDER BY, LIMIT and OFFSET clauses.
    pub(crate) fn build_tail(&self) -> String {
        let order = if self.newest_first { "DESC" } else { "ASC" };
        let mut tail = format!("ORDER BY start_time {}", order);

        if let Some(limit) = self.limit {
            tail.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            // SQLite needs a LIMIT before OFFSET.
            if self.limit.is_none() {
                tail.push_str(" LIMIT -1");
            }
            tail.push_str(&format!(" OFFSET {}", offset));
        }

        tail
    }
}
