//! JSON and CSV export.
//!
//! JSON exports carry whole routes and can be imported back; CSV exports one
//! route's waypoints for spreadsheets and mapping tools.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use uuid::Uuid;

use drivelog_types::RouteSession;

use crate::error::{Error, Result};
use crate::models::ImportResult;
use crate::queries::RouteQuery;
use crate::store::RouteStore;

/// Export format version.
pub const EXPORT_VERSION: u32 = 1;

/// Top-level JSON export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Format version.
    pub version: u32,
    /// When the export was written.
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    /// Exported routes with waypoints.
    pub routes: Vec<RouteSession>,
}

#[derive(Debug, Serialize)]
struct WaypointCsvRow<'a> {
    seq: usize,
    timestamp: String,
    latitude: f64,
    longitude: f64,
    address: &'a str,
}

impl RouteStore {
    /// Write matching routes as a JSON document. Returns the route count.
    pub fn export_json<W: Write>(&self, query: &RouteQuery, writer: W) -> Result<usize> {
        let routes = self.query_routes(query)?;
        let count = routes.len();
        let document = ExportDocument {
            version: EXPORT_VERSION,
            exported_at: OffsetDateTime::now_utc(),
            routes,
        };
        serde_json::to_writer_pretty(writer, &document)?;
        info!("Exported {} routes", count);
        Ok(count)
    }

    /// Import routes from a JSON document, skipping ids already stored.
    ///
    /// An active route is only imported when no other route is active;
    /// otherwise it is counted in [`ImportResult::conflicts`].
    pub fn import_json<R: Read>(&self, reader: R) -> Result<ImportResult> {
        let document: ExportDocument = serde_json::from_reader(reader)?;
        if document.version > EXPORT_VERSION {
            warn!(
                "Importing export version {} with reader version {}",
                document.version, EXPORT_VERSION
            );
        }

        let mut result = ImportResult::default();
        for route in &document.routes {
            if self.contains_route(route.id)? {
                result.skipped += 1;
                continue;
            }
            match self.insert_route(route) {
                Ok(()) => result.imported += 1,
                Err(Error::ActiveRouteExists(existing)) => {
                    warn!(
                        "Not importing active route {}, route {} is already active",
                        route.id, existing
                    );
                    result.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Imported {} routes ({} skipped, {} conflicting)",
            result.imported, result.skipped, result.conflicts
        );
        Ok(result)
    }

    /// Write one route's waypoints as CSV. Returns the row count.
    pub fn export_waypoints_csv<W: Write>(&self, id: Uuid, writer: W) -> Result<usize> {
        let route = self.get_route(id)?.ok_or(Error::RouteNotFound(id))?;

        let mut csv = csv::Writer::from_writer(writer);
        for (seq, waypoint) in route.waypoints.iter().enumerate() {
            let timestamp = waypoint
                .timestamp
                .format(&Rfc3339)
                .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;
            csv.serialize(WaypointCsvRow {
                seq,
                timestamp,
                latitude: waypoint.latitude,
                longitude: waypoint.longitude,
                address: &waypoint.address,
            })?;
        }
        csv.flush()?;
        Ok(route.waypoints.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelog_types::{Coordinate, Place, Waypoint};
    use time::macros::datetime;

    fn route_with_trail(start: OffsetDateTime) -> RouteSession {
        let origin = Coordinate::new(51.5074, -0.1278).unwrap();
        let mut route = RouteSession::new(start, Some(Place::new("Trafalgar", origin)));
        let waypoints: Vec<_> = (0..6)
            .map(|i| Waypoint {
                latitude: origin.latitude + i as f64 * 0.0004,
                longitude: origin.longitude - i as f64 * 0.0002,
                address: format!("Strand, stop {}", i),
                timestamp: start + time::Duration::seconds(10 * i),
            })
            .collect();
        route.complete(
            start + time::Duration::minutes(5),
            Some(Place::manual("Office")),
            waypoints,
        );
        route
    }

    #[test]
    fn test_json_export_import_reproduces_routes() {
        let source = RouteStore::open_in_memory().unwrap();
        let route = route_with_trail(datetime!(2025-04-02 09:00:00.25 UTC));
        source.insert_route(&route).unwrap();

        let mut buffer = Vec::new();
        assert_eq!(source.export_json(&RouteQuery::new(), &mut buffer).unwrap(), 1);

        let target = RouteStore::open_in_memory().unwrap();
        let result = target.import_json(buffer.as_slice()).unwrap();
        assert_eq!(result, ImportResult { imported: 1, skipped: 0, conflicts: 0 });

        let loaded = target.get_route(route.id).unwrap().unwrap();
        assert_eq!(loaded, route);

        let again = target.import_json(buffer.as_slice()).unwrap();
        assert_eq!(again, ImportResult { imported: 0, skipped: 1, conflicts: 0 });
    }

    #[test]
    fn test_csv_export() {
        let store = RouteStore::open_in_memory().unwrap();
        let route = route_with_trail(datetime!(2025-04-02 09:00 UTC));
        store.insert_route(&route).unwrap();

        let mut buffer = Vec::new();
        assert_eq!(store.export_waypoints_csv(route.id, &mut buffer).unwrap(), 6);

        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("seq,timestamp,latitude,longitude,address")
        );
        assert!(lines.next().unwrap().starts_with("0,2025-04-02T09:00:00Z,51.5074"));
        assert_eq!(text.lines().count(), 7);
    }

    #[test]
    fn test_csv_export_unknown_route() {
        let store = RouteStore::open_in_memory().unwrap();
        let result = store.export_waypoints_csv(Uuid::new_v4(), Vec::new());
        assert!(matches!(result, Err(Error::RouteNotFound(_))));
    }

    #[test]
    fn test_import_keeps_single_active_route() {
        let source = RouteStore::open_in_memory().unwrap();
        let incoming = RouteSession::new(datetime!(2025-04-03 08:00 UTC), None);
        source.insert_route(&incoming).unwrap();
        source
            .insert_route(&route_with_trail(datetime!(2025-04-02 09:00 UTC)))
            .unwrap();
        let mut buffer = Vec::new();
        source.export_json(&RouteQuery::new(), &mut buffer).unwrap();

        let target = RouteStore::open_in_memory().unwrap();
        let local = RouteSession::new(datetime!(2025-04-04 08:00 UTC), None);
        target.insert_route(&local).unwrap();

        let result = target.import_json(buffer.as_slice()).unwrap();
        assert_eq!((result.imported, result.skipped, result.conflicts), (1, 0, 1));
        assert!(!target.contains_route(incoming.id).unwrap());
        assert_eq!(target.active_route().unwrap().unwrap().id, local.id);
    }
}
