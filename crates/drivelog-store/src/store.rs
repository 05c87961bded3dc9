//! Main store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use drivelog_core::{RouteMutator, RoutePersistence};
use drivelog_types::{Place, RouteSession, RouteStatus, Waypoint};

use crate::error::{Error, Result};
use crate::models::{
    ROUTE_COLUMNS, RouteRow, RouteStats, RouteSummary, from_nanos, place_columns, to_nanos,
};
use crate::queries::RouteQuery;
use crate::schema;

/// SQLite-based route store.
///
/// The connection sits behind a mutex so the store can be shared as an
/// `Arc<dyn RoutePersistence>` across tasks.
pub struct RouteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for RouteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteStore").finish_non_exhaustive()
    }
}

impl RouteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Route operations
impl RouteStore {
    /// Insert a new route with its waypoints.
    ///
    /// Fails with [`Error::ActiveRouteExists`] if `route` is active and a
    /// different route is already active.
    pub fn insert_route(&self, route: &RouteSession) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_single_active(&tx, route)?;
        insert_row(&tx, route)?;
        replace_waypoints(&tx, route)?;
        tx.commit()?;
        debug!("Inserted route {}", route.id);
        Ok(())
    }

    /// Overwrite a stored route and its waypoints.
    pub fn save_route(&self, route: &RouteSession) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_single_active(&tx, route)?;
        update_row(&tx, route)?;
        replace_waypoints(&tx, route)?;
        tx.commit()?;
        Ok(())
    }

    /// Load, change, and write back a route in one transaction.
    pub fn modify_route<F>(&self, id: Uuid, change: F) -> Result<RouteSession>
    where
        F: FnOnce(&mut RouteSession) -> Result<()>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut route = load_route(&tx, id)?.ok_or(Error::RouteNotFound(id))?;
        change(&mut route)?;
        ensure_single_active(&tx, &route)?;
        update_row(&tx, &route)?;
        replace_waypoints(&tx, &route)?;
        tx.commit()?;
        Ok(route)
    }

    /// Get a route by id, with waypoints.
    pub fn get_route(&self, id: Uuid) -> Result<Option<RouteSession>> {
        load_route(&self.conn(), id)
    }

    /// The route still marked active, if any.
    pub fn active_route(&self) -> Result<Option<RouteSession>> {
        let query = RouteQuery::new().status(RouteStatus::Active).limit(1);
        Ok(self.query_routes(&query)?.pop())
    }

    /// Query routes with waypoints.
    pub fn query_routes(&self, query: &RouteQuery) -> Result<Vec<RouteSession>> {
        let conn = self.conn();
        let rows = select_rows(&conn, query)?;
        rows.into_iter()
            .map(|row| {
                let waypoints = load_waypoints(&conn, &row.id)?;
                row.into_route(waypoints)
            })
            .collect()
    }

    /// Query routes without loading waypoints.
    pub fn list_summaries(&self, query: &RouteQuery) -> Result<Vec<RouteSummary>> {
        let conn = self.conn();
        let rows = select_rows(&conn, query)?;
        let mut count_stmt = conn.prepare("SELECT COUNT(*) FROM waypoints WHERE route_id = ?")?;

        rows.into_iter()
            .map(|row| {
                let count: i64 = count_stmt.query_row([&row.id], |r| r.get(0))?;
                let route = row.into_route(Vec::new())?;
                Ok(RouteSummary {
                    id: route.id,
                    start_time: route.start_time,
                    end_time: route.end_time,
                    status: route.status,
                    start_label: route.start_location.map(|p| p.label),
                    end_label: route.end_location.map(|p| p.label),
                    distance: route.distance,
                    duration: route.duration,
                    waypoint_count: count as u64,
                })
            })
            .collect()
    }

    /// Count routes, optionally by status.
    pub fn count_routes(&self, status: Option<RouteStatus>) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM routes WHERE status = ?",
                [status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM routes", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Whether a route with this id is stored.
    pub fn contains_route(&self, id: Uuid) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT COUNT(*) > 0 FROM routes WHERE id = ?",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Delete a route and its waypoints. Returns whether it existed.
    pub fn remove_route(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM routes WHERE id = ?", [id.to_string()])?;
        if deleted > 0 {
            info!("Deleted route {}", id);
        }
        Ok(deleted > 0)
    }

    /// Aggregate statistics over all routes.
    pub fn stats(&self) -> Result<RouteStats> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM routes GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stats = RouteStats::default();
        for (status, count) in counts {
            let count = count as u64;
            stats.total_routes += count;
            match status.parse::<RouteStatus>()? {
                RouteStatus::Active => stats.active = count,
                RouteStatus::Completed => stats.completed = count,
                RouteStatus::Cancelled => stats.cancelled = count,
            }
        }

        let (distance, duration, longest): (Option<f64>, Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT SUM(distance), SUM(duration), MAX(distance) FROM routes WHERE status = ?",
                [RouteStatus::Completed.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
        stats.total_distance = distance.unwrap_or_default();
        stats.total_duration = duration.unwrap_or_default();
        stats.longest_distance = longest;

        Ok(stats)
    }
}

fn select_rows(conn: &Connection, query: &RouteQuery) -> Result<Vec<RouteRow>> {
    let (where_clause, params) = query.build_where();
    let sql = format!(
        "SELECT {} FROM routes {} {}",
        ROUTE_COLUMNS,
        where_clause,
        query.build_tail()
    );
    debug!("Executing query: {}", sql);

    let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), RouteRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_route(conn: &Connection, id: Uuid) -> Result<Option<RouteSession>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM routes WHERE id = ?", ROUTE_COLUMNS),
            [id.to_string()],
            RouteRow::from_row,
        )
        .optional()?;

    match row {
        Some(row) => {
            let waypoints = load_waypoints(conn, &row.id)?;
            Ok(Some(row.into_route(waypoints)?))
        }
        None => Ok(None),
    }
}

fn load_waypoints(conn: &Connection, route_id: &str) -> Result<Vec<Waypoint>> {
    let mut stmt = conn.prepare(
        "SELECT latitude, longitude, address, timestamp
         FROM waypoints WHERE route_id = ? ORDER BY seq",
    )?;
    let raw = stmt
        .query_map([route_id], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(latitude, longitude, address, timestamp)| {
            Ok(Waypoint {
                latitude,
                longitude,
                address,
                timestamp: from_nanos(timestamp)?,
            })
        })
        .collect()
}

fn ensure_single_active(conn: &Connection, route: &RouteSession) -> Result<()> {
    if route.status != RouteStatus::Active {
        return Ok(());
    }
    let other: Option<String> = conn
        .query_row(
            "SELECT id FROM routes WHERE status = ?1 AND id != ?2 LIMIT 1",
            rusqlite::params![RouteStatus::Active.as_str(), route.id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match other {
        Some(id) => Err(Error::ActiveRouteExists(
            id.parse().map_err(|_| Error::CorruptRow(format!("route id {}", id)))?,
        )),
        None => Ok(()),
    }
}

fn insert_row(conn: &Connection, route: &RouteSession) -> Result<()> {
    let (start_label, start_lat, start_lon) = place_columns(route.start_location.as_ref());
    let (end_label, end_lat, end_lon) = place_columns(route.end_location.as_ref());

    conn.execute(
        "INSERT INTO routes (id, start_time, end_time, status, start_label, start_latitude,
         start_longitude, end_label, end_latitude, end_longitude, distance, duration, note,
         updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            route.id.to_string(),
            to_nanos(route.start_time),
            route.end_time.map(to_nanos),
            route.status.as_str(),
            start_label,
            start_lat,
            start_lon,
            end_label,
            end_lat,
            end_lon,
            route.distance,
            route.duration,
            route.note,
            to_nanos(OffsetDateTime::now_utc()),
        ],
    )?;
    Ok(())
}

fn update_row(conn: &Connection, route: &RouteSession) -> Result<()> {
    let (start_label, start_lat, start_lon) = place_columns(route.start_location.as_ref());
    let (end_label, end_lat, end_lon) = place_columns(route.end_location.as_ref());

    let updated = conn.execute(
        "UPDATE routes SET
            start_time = ?2, end_time = ?3, status = ?4,
            start_label = ?5, start_latitude = ?6, start_longitude = ?7,
            end_label = ?8, end_latitude = ?9, end_longitude = ?10,
            distance = ?11, duration = ?12, note = ?13, updated_at = ?14
         WHERE id = ?1",
        rusqlite::params![
            route.id.to_string(),
            to_nanos(route.start_time),
            route.end_time.map(to_nanos),
            route.status.as_str(),
            start_label,
            start_lat,
            start_lon,
            end_label,
            end_lat,
            end_lon,
            route.distance,
            route.duration,
            route.note,
            to_nanos(OffsetDateTime::now_utc()),
        ],
    )?;

    if updated == 0 {
        return Err(Error::RouteNotFound(route.id));
    }
    Ok(())
}

fn replace_waypoints(conn: &Connection, route: &RouteSession) -> Result<()> {
    let id = route.id.to_string();
    conn.execute("DELETE FROM waypoints WHERE route_id = ?", [&id])?;

    let mut stmt = conn.prepare(
        "INSERT INTO waypoints (route_id, seq, latitude, longitude, address, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (seq, waypoint) in route.waypoints.iter().enumerate() {
        stmt.execute(rusqlite::params![
            id,
            seq as i64,
            waypoint.latitude,
            waypoint.longitude,
            waypoint.address,
            to_nanos(waypoint.timestamp),
        ])?;
    }
    Ok(())
}

// RoutePersistence, for the session controller
#[async_trait]
impl RoutePersistence for RouteStore {
    async fn start_route(
        &self,
        start_location: Option<Place>,
    ) -> drivelog_core::Result<RouteSession> {
        let route = RouteSession::new(OffsetDateTime::now_utc(), start_location);
        self.insert_route(&route)?;
        info!("Route {} created", route.id);
        Ok(route)
    }

    async fn update_route(
        &self,
        id: Uuid,
        mutator: RouteMutator,
    ) -> drivelog_core::Result<RouteSession> {
        Ok(self.modify_route(id, |route| {
            mutator(route);
            Ok(())
        })?)
    }

    async fn end_route(
        &self,
        id: Uuid,
        end_location: Option<Place>,
        waypoints: Vec<Waypoint>,
    ) -> drivelog_core::Result<RouteSession> {
        let route = self.modify_route(id, |route| {
            if route.complete(OffsetDateTime::now_utc(), end_location, waypoints) {
                Ok(())
            } else {
                Err(Error::RouteFinished {
                    id,
                    status: route.status.to_string(),
                })
            }
        })?;
        info!(
            "Route {} completed with {} waypoints",
            id,
            route.waypoints.len()
        );
        Ok(route)
    }

    async fn current_active_route(&self) -> drivelog_core::Result<Option<RouteSession>> {
        Ok(self.active_route()?)
    }

    async fn delete_route(&self, id: Uuid) -> drivelog_core::Result<()> {
        if self.remove_route(id)? {
            Ok(())
        } else {
            Err(Error::RouteNotFound(id).into())
        }
    }

    async fn fetch_all_routes(&self) -> drivelog_core::Result<Vec<RouteSession>> {
        Ok(self.query_routes(&RouteQuery::new())?)
    }

    async fn fetch_recent_routes(&self, limit: usize) -> drivelog_core::Result<Vec<RouteSession>> {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        Ok(self.query_routes(&RouteQuery::new().limit(limit))?)
    }
}

#[cfg(test)]
impl RouteStore {
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        f(&mut self.conn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelog_types::Coordinate;
    use time::macros::datetime;

    fn sample_route(start: OffsetDateTime, points: usize) -> RouteSession {
        let origin = Coordinate::new(35.6812, 139.7671).unwrap();
        let mut route = RouteSession::new(start, Some(Place::new("Tokyo Station", origin)));
        route.waypoints = (0..points)
            .map(|i| Waypoint {
                latitude: origin.latitude + i as f64 * 0.0005,
                longitude: origin.longitude,
                address: format!("Block {}", i),
                timestamp: start + time::Duration::milliseconds(1500 * i as i64 + 7),
            })
            .collect();
        route
    }

    #[test]
    fn test_open_in_memory() {
        let store = RouteStore::open_in_memory().unwrap();
        assert_eq!(store.count_routes(None).unwrap(), 0);
        assert!(store.active_route().unwrap().is_none());
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = RouteStore::open_in_memory().unwrap();
        let mut route = sample_route(datetime!(2025-05-01 07:30:00.123456789 UTC), 5);
        route.note = Some("to the office".into());
        store.insert_route(&route).unwrap();

        let loaded = store.get_route(route.id).unwrap().unwrap();
        assert_eq!(loaded, route);
    }

    #[test]
    fn test_save_replaces_waypoints() {
        let store = RouteStore::open_in_memory().unwrap();
        let mut route = sample_route(datetime!(2025-05-01 07:30 UTC), 5);
        store.insert_route(&route).unwrap();

        route.waypoints.truncate(2);
        store.save_route(&route).unwrap();
        assert_eq!(store.get_route(route.id).unwrap().unwrap().waypoints.len(), 2);
    }

    #[test]
    fn test_save_unknown_route_fails() {
        let store = RouteStore::open_in_memory().unwrap();
        let route = sample_route(datetime!(2025-05-01 07:30 UTC), 0);
        assert!(matches!(
            store.save_route(&route),
            Err(Error::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_active_route_skips_finished() {
        let store = RouteStore::open_in_memory().unwrap();
        let active = sample_route(datetime!(2025-05-01 07:00 UTC), 1);
        let mut done = sample_route(datetime!(2025-05-03 07:00 UTC), 1);
        done.complete(datetime!(2025-05-03 08:00 UTC), None, done.waypoints.clone());
        for route in [&active, &done] {
            store.insert_route(route).unwrap();
        }

        assert_eq!(store.active_route().unwrap().unwrap().id, active.id);
    }

    #[test]
    fn test_second_active_route_is_refused() {
        let store = RouteStore::open_in_memory().unwrap();
        let first = sample_route(datetime!(2025-05-01 07:00 UTC), 1);
        let second = sample_route(datetime!(2025-05-02 07:00 UTC), 1);
        store.insert_route(&first).unwrap();

        let err = store.insert_route(&second).unwrap_err();
        assert!(matches!(err, Error::ActiveRouteExists(id) if id == first.id));
        assert!(!store.contains_route(second.id).unwrap());
        assert_eq!(store.count_routes(Some(RouteStatus::Active)).unwrap(), 1);

        // Rewriting the active route itself is fine.
        store.save_route(&first).unwrap();
    }

    #[tokio::test]
    async fn test_start_route_refused_while_one_is_active() {
        let store = RouteStore::open_in_memory().unwrap();
        let first = store.start_route(None).await.unwrap();

        let err = store.start_route(None).await.unwrap_err();
        assert!(matches!(err, drivelog_core::Error::Persistence(_)));
        assert_eq!(store.current_active_route().await.unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_delete_cascades_waypoints() {
        let store = RouteStore::open_in_memory().unwrap();
        let route = sample_route(datetime!(2025-05-01 07:30 UTC), 3);
        store.insert_route(&route).unwrap();

        assert!(store.remove_route(route.id).unwrap());
        assert!(!store.remove_route(route.id).unwrap());
        let orphans: i64 = store
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM waypoints", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_summaries_and_stats() {
        let store = RouteStore::open_in_memory().unwrap();
        let mut a = sample_route(datetime!(2025-05-01 07:00 UTC), 4);
        a.complete(datetime!(2025-05-01 07:20 UTC), None, a.waypoints.clone());
        let mut b = sample_route(datetime!(2025-05-02 07:00 UTC), 2);
        b.cancel(datetime!(2025-05-02 07:05 UTC), b.waypoints.clone());
        let c = sample_route(datetime!(2025-05-03 07:00 UTC), 0);
        for route in [&a, &b, &c] {
            store.insert_route(route).unwrap();
        }

        let summaries = store.list_summaries(&RouteQuery::new()).unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].id, c.id);
        assert_eq!(summaries[2].waypoint_count, 4);
        assert_eq!(summaries[2].start_label.as_deref(), Some("Tokyo Station"));

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_routes, 3);
        assert_eq!((stats.completed, stats.cancelled, stats.active), (1, 1, 1));
        assert_eq!(stats.total_duration, 1200.0);
        assert_eq!(stats.longest_distance, a.distance);
    }

    #[tokio::test]
    async fn test_persistence_lifecycle() {
        let store = RouteStore::open_in_memory().unwrap();
        let route = store.start_route(None).await.unwrap();
        assert!(store.current_active_route().await.unwrap().is_some());

        let waypoints = sample_route(route.start_time, 3).waypoints;
        let copy = waypoints.clone();
        store
            .update_route(route.id, Box::new(move |r| r.waypoints = copy))
            .await
            .unwrap();

        let ended = store
            .end_route(route.id, Some(Place::manual("Home")), waypoints.clone())
            .await
            .unwrap();
        assert_eq!(ended.status, RouteStatus::Completed);
        assert_eq!(ended.waypoints, waypoints);
        assert!(store.current_active_route().await.unwrap().is_none());

        let again = store.end_route(route.id, None, Vec::new()).await;
        assert!(matches!(again, Err(drivelog_core::Error::Persistence(_))));

        store.delete_route(route.id).await.unwrap();
        assert!(store.delete_route(route.id).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_recent_routes_newest_first() {
        let store = RouteStore::open_in_memory().unwrap();
        let days: Vec<_> = (1..=4)
            .map(|d| sample_route(datetime!(2025-05-01 07:00 UTC) + time::Duration::days(d), 0))
            .collect();
        for route in &days {
            store.insert_route(route).unwrap();
        }

        let recent = store.fetch_recent_routes(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, days[3].id);
        assert_eq!(recent[1].id, days[2].id);
        assert_eq!(store.fetch_all_routes().await.unwrap().len(), 4);
    }

    #[test]
    fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("routes.db");
        let route = sample_route(datetime!(2025-05-01 07:30 UTC), 3);
        {
            let store = RouteStore::open(&path).unwrap();
            store.insert_route(&route).unwrap();
        }

        let store = RouteStore::open(&path).unwrap();
        assert_eq!(store.get_route(route.id).unwrap().unwrap(), route);
    }
}
