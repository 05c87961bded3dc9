//! Platform-agnostic data model for drive recording.
//!
//! This crate provides shared types used by the tracking engine
//! (drivelog-core), the SQLite store (drivelog-store), and any host
//! application embedding them.
//!
//! # Features
//!
//! - Coordinates with validation and great-circle distance
//! - Location readings, waypoints, and route endpoints
//! - Route sessions with forward-only status transitions
//! - Location authorization states
//! - Reverse-geocoding placemarks
//!
//! # Example
//!
//! ```
//! use drivelog_types::{Coordinate, RouteSession, RouteStatus};
//! use time::OffsetDateTime;
//!
//! let route = RouteSession::new(OffsetDateTime::now_utc(), None);
//! assert_eq!(route.status, RouteStatus::Active);
//!
//! let a = Coordinate::new(0.0, 0.0).unwrap();
//! let b = Coordinate::new(0.0, 1.0).unwrap();
//! assert!((a.distance_to(&b) - 111_195.0).abs() < 200.0);
//! ```

pub mod error;
pub mod route;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use route::{RouteSession, RouteStatus};
pub use types::{
    AuthorizationState, Coordinate, EARTH_RADIUS_M, LocationReading, Place, Placemark, Waypoint,
    haversine_distance,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::{Duration, OffsetDateTime, macros::datetime};

    fn waypoint(coord: Coordinate, at: OffsetDateTime) -> Waypoint {
        Waypoint {
            latitude: coord.latitude,
            longitude: coord.longitude,
            address: format!("{}", coord),
            timestamp: at,
        }
    }

    // --- Coordinate tests ---

    #[test]
    fn test_coordinate_rejects_out_of_range() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(90.01, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_coordinate_error_display() {
        let err = Coordinate::new(100.0, 5.0).unwrap_err();
        assert!(err.to_string().contains("latitude=100"));
    }

    #[test]
    fn test_haversine_one_degree_of_longitude_at_equator() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn test_offset_north_matches_distance() {
        let origin = Coordinate::new(31.2304, 121.4737).unwrap();
        let moved = origin.offset_north(12.0);
        assert!((origin.distance_to(&moved) - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_coordinate_display_uses_four_decimals() {
        let coord = Coordinate::new(39.904_21, 116.407_39).unwrap();
        assert_eq!(coord.to_string(), "39.9042,116.4074");
    }

    // --- LocationReading tests ---

    #[test]
    fn test_negative_accuracy_is_never_within_bounds() {
        let reading = LocationReading::new(
            Coordinate::new(0.0, 0.0).unwrap(),
            -1.0,
            OffsetDateTime::now_utc(),
        );
        assert!(!reading.accuracy_within(100.0));
    }

    #[test]
    fn test_reading_age() {
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let reading = LocationReading::new(
            Coordinate::new(0.0, 0.0).unwrap(),
            5.0,
            now - Duration::seconds(10),
        );
        assert_eq!(reading.age(now), core::time::Duration::from_secs(10));

        let future = LocationReading::new(reading.coordinate, 5.0, now + Duration::seconds(3));
        assert_eq!(future.age(now), core::time::Duration::ZERO);
    }

    // --- AuthorizationState tests ---

    #[test]
    fn test_authorization_helpers() {
        assert!(AuthorizationState::Always.is_granted());
        assert!(AuthorizationState::WhenInUse.is_granted());
        assert!(!AuthorizationState::Undetermined.is_granted());
        assert!(AuthorizationState::Denied.is_blocked());
        assert!(AuthorizationState::Restricted.is_blocked());
        assert!(AuthorizationState::WhenInUse.can_elevate());
        assert!(!AuthorizationState::Always.can_elevate());
        assert!(!AuthorizationState::Denied.can_elevate());
    }

    #[test]
    fn test_authorization_round_trips_through_str() {
        for state in [
            AuthorizationState::Undetermined,
            AuthorizationState::WhenInUse,
            AuthorizationState::Always,
            AuthorizationState::Denied,
            AuthorizationState::Restricted,
        ] {
            assert_eq!(state.as_str().parse::<AuthorizationState>().unwrap(), state);
        }
        assert!("sometimes".parse::<AuthorizationState>().is_err());
    }

    // --- RouteSession tests ---

    #[test]
    fn test_route_status_parse() {
        assert_eq!("active".parse::<RouteStatus>().unwrap(), RouteStatus::Active);
        assert_eq!(
            "cancelled".parse::<RouteStatus>().unwrap(),
            RouteStatus::Cancelled
        );
        let err = "paused".parse::<RouteStatus>().unwrap_err();
        assert_eq!(err, ParseError::UnknownStatus("paused".to_string()));
    }

    #[test]
    fn test_complete_computes_distance_and_duration() {
        let start = datetime!(2025-06-01 08:00:00 UTC);
        let origin = Coordinate::new(31.0, 121.0).unwrap();
        let mut route = RouteSession::new(start, None);

        let waypoints = vec![
            waypoint(origin, start),
            waypoint(origin.offset_north(100.0), start + Duration::seconds(30)),
            waypoint(origin.offset_north(250.0), start + Duration::seconds(60)),
        ];
        let end = start + Duration::minutes(2);
        assert!(route.complete(end, Some(Place::manual("Home")), waypoints));

        assert_eq!(route.status, RouteStatus::Completed);
        assert_eq!(route.end_time, Some(end));
        assert!((route.distance.unwrap() - 250.0).abs() < 0.1);
        assert_eq!(route.duration, Some(120.0));
        assert_eq!(route.end_location.as_ref().unwrap().label, "Home");
    }

    #[test]
    fn test_transitions_only_go_forward() {
        let start = datetime!(2025-06-01 08:00:00 UTC);
        let mut route = RouteSession::new(start, None);
        assert!(route.cancel(start + Duration::minutes(1), Vec::new()));
        assert_eq!(route.status, RouteStatus::Cancelled);

        // Neither a second cancel nor a completion may change a terminal route.
        assert!(!route.cancel(start + Duration::minutes(5), Vec::new()));
        assert!(!route.complete(start + Duration::minutes(5), None, Vec::new()));
        assert_eq!(route.status, RouteStatus::Cancelled);
        assert_eq!(route.end_time, Some(start + Duration::minutes(1)));
    }

    #[test]
    fn test_elapsed_stops_at_end_time() {
        let start = datetime!(2025-06-01 08:00:00 UTC);
        let mut route = RouteSession::new(start, None);
        assert_eq!(
            route.elapsed(start + Duration::seconds(42)),
            core::time::Duration::from_secs(42)
        );
        route.cancel(start + Duration::seconds(50), Vec::new());
        assert_eq!(
            route.elapsed(start + Duration::hours(3)),
            core::time::Duration::from_secs(50)
        );
    }

    // --- Serialization tests ---

    #[test]
    fn test_route_serialization_roundtrip_preserves_order() {
        let start = datetime!(2025-06-01 08:00:00 UTC);
        let origin = Coordinate::new(22.5431, 114.0579).unwrap();
        let mut route = RouteSession::new(start, Some(Place::new("Futian", origin)));
        route.waypoints = (0..25)
            .map(|i| {
                waypoint(
                    origin.offset_north(f64::from(i) * 20.0),
                    start + Duration::seconds(i64::from(i) * 5),
                )
            })
            .collect();
        route.note = Some("commute".to_string());

        let json = serde_json::to_string(&route).unwrap();
        let restored: RouteSession = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, route.id);
        assert_eq!(restored.status, RouteStatus::Active);
        assert_eq!(restored.waypoints.len(), 25);
        assert_eq!(restored.waypoints, route.waypoints);
        assert_eq!(restored, route);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RouteStatus::Completed).unwrap(),
            "\"Completed\""
        );
    }

    #[test]
    fn test_manual_place_omits_coordinate() {
        let json = serde_json::to_string(&Place::manual("Office")).unwrap();
        assert_eq!(json, r#"{"label":"Office"}"#);
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric_and_non_negative(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let d1 = haversine_distance(lat1, lon1, lat2, lon2);
            let d2 = haversine_distance(lat2, lon2, lat1, lon1);
            prop_assert!(d1 >= 0.0);
            prop_assert!((d1 - d2).abs() < 1e-6);
        }

        #[test]
        fn prop_valid_ranges_always_construct(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            prop_assert!(Coordinate::new(lat, lon).is_ok());
        }
    }
}
