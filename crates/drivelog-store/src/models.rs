//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use drivelog_types::{Coordinate, Place, RouteSession, RouteStatus, Waypoint};

use crate::error::{Error, Result};

/// Convert a timestamp to the stored representation, saturating far outside
/// the representable range.
pub(crate) fn to_nanos(time: OffsetDateTime) -> i64 {
    let nanos = time.unix_timestamp_nanos();
    i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX })
}

/// Convert a stored timestamp back.
pub(crate) fn from_nanos(nanos: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| Error::InvalidTimestamp(format!("{}: {}", nanos, e)))
}

/// A route without its waypoints, for list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    /// Route identifier.
    pub id: Uuid,
    /// When the drive started.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// When the drive ended.
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// Lifecycle status.
    pub status: RouteStatus,
    /// Start label.
    pub start_label: Option<String>,
    /// End label.
    pub end_label: Option<String>,
    /// Total distance in meters.
    pub distance: Option<f64>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Number of stored waypoints.
    pub waypoint_count: u64,
}

/// Aggregate statistics over stored routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteStats {
    /// Routes of any status.
    pub total_routes: u64,
    /// Completed routes.
    pub completed: u64,
    /// Cancelled routes.
    pub cancelled: u64,
    /// Routes still marked active.
    pub active: u64,
    /// Distance over completed routes, in meters.
    pub total_distance: f64,
    /// Duration over completed routes, in seconds.
    pub total_duration: f64,
    /// Longest completed route, in meters.
    pub longest_distance: Option<f64>,
}

/// Result of a JSON import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Routes written.
    pub imported: usize,
    /// Routes skipped because their id already exists.
    pub skipped: usize,
    /// Active routes not imported because another route is active.
    pub conflicts: usize,
}

/// Raw `routes` columns, converted to a [`RouteSession`] outside the row
/// callback so conversion errors keep their own type.
#[derive(Debug)]
pub(crate) struct RouteRow {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub start_label: Option<String>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub end_label: Option<String>,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub note: Option<String>,
}

/// Column list matching [`RouteRow::from_row`].
pub(crate) const ROUTE_COLUMNS: &str = "id, start_time, end_time, status, start_label, \
     start_latitude, start_longitude, end_label, end_latitude, end_longitude, distance, \
     duration, note";

impl RouteRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            status: row.get(3)?,
            start_label: row.get(4)?,
            start_latitude: row.get(5)?,
            start_longitude: row.get(6)?,
            end_label: row.get(7)?,
            end_latitude: row.get(8)?,
            end_longitude: row.get(9)?,
            distance: row.get(10)?,
            duration: row.get(11)?,
            note: row.get(12)?,
        })
    }

    /// Build the route with the given waypoints.
    pub(crate) fn into_route(self, waypoints: Vec<Waypoint>) -> Result<RouteSession> {
        Ok(RouteSession {
            id: parse_id(&self.id)?,
            start_time: from_nanos(self.start_time)?,
            end_time: self.end_time.map(from_nanos).transpose()?,
            status: self.status.parse()?,
            start_location: place(self.start_label, self.start_latitude, self.start_longitude)?,
            end_location: place(self.end_label, self.end_latitude, self.end_longitude)?,
            waypoints,
            distance: self.distance,
            duration: self.duration,
            note: self.note,
        })
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|e| Error::CorruptRow(format!("route id {:?}: {}", id, e)))
}

fn place(
    label: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<Option<Place>> {
    let Some(label) = label else {
        return Ok(None);
    };
    match (latitude, longitude) {
        (Some(lat), Some(lon)) => Ok(Some(Place::new(label, Coordinate::new(lat, lon)?))),
        _ => Ok(Some(Place::manual(label))),
    }
}

/// Split a place into label, latitude and longitude columns.
pub(crate) fn place_columns(place: Option<&Place>) -> (Option<&str>, Option<f64>, Option<f64>) {
    match place {
        Some(place) => (
            Some(place.label.as_str()),
            place.coordinate.map(|c| c.latitude),
            place.coordinate.map(|c| c.longitude),
        ),
        None => (None, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_nanos_round_trip() {
        let time = datetime!(2025-03-14 15:09:26.535897932 UTC);
        assert_eq!(from_nanos(to_nanos(time)).unwrap(), time);
    }

    #[test]
    fn test_place_columns() {
        let coordinate = Coordinate::new(1.0, 2.0).unwrap();
        let here = Place::new("Here", coordinate);
        assert_eq!(
            place_columns(Some(&here)),
            (Some("Here"), Some(1.0), Some(2.0))
        );
        assert_eq!(place_columns(None), (None, None, None));

        let manual = place(Some("Home".into()), None, None).unwrap().unwrap();
        assert!(manual.coordinate.is_none());
        assert!(place(Some("Bad".into()), Some(95.0), Some(0.0)).is_err());
    }
}
