//! Core types for location samples and their labels.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Mean Earth radius in meters used for great-circle distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic coordinate in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinate {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a validated coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidCoordinate`] if either component is not
    /// finite or lies outside `[-90, 90]` / `[-180, 180]`.
    ///
    /// ```
    /// use drivelog_types::Coordinate;
    ///
    /// assert!(Coordinate::new(39.9042, 116.4074).is_ok());
    /// assert!(Coordinate::new(91.0, 0.0).is_err());
    /// ```
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ParseError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if valid {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(ParseError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    /// Great-circle (haversine) distance to `other` in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Return the coordinate displaced `meters` due north.
    ///
    /// Handy for building synthetic tracks with known spacing.
    #[must_use]
    pub fn offset_north(&self, meters: f64) -> Coordinate {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        Coordinate {
            latitude: self.latitude + dlat,
            longitude: self.longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Haversine distance in meters between two latitude/longitude pairs.
#[must_use]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// A single location fix delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocationReading {
    /// Where the fix was taken.
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters. Negative values mean the fix is invalid.
    pub horizontal_accuracy: f64,
    /// When the fix was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl LocationReading {
    /// Create a new reading.
    pub fn new(coordinate: Coordinate, horizontal_accuracy: f64, timestamp: OffsetDateTime) -> Self {
        Self {
            coordinate,
            horizontal_accuracy,
            timestamp,
        }
    }

    /// Whether the accuracy lies within `[0, max_meters]`.
    ///
    /// ```
    /// use drivelog_types::{Coordinate, LocationReading};
    /// use time::OffsetDateTime;
    ///
    /// let coord = Coordinate::new(0.0, 0.0).unwrap();
    /// let reading = LocationReading::new(coord, 12.0, OffsetDateTime::now_utc());
    /// assert!(reading.accuracy_within(50.0));
    /// assert!(!reading.accuracy_within(10.0));
    /// ```
    #[must_use]
    pub fn accuracy_within(&self, max_meters: f64) -> bool {
        self.horizontal_accuracy >= 0.0 && self.horizontal_accuracy <= max_meters
    }

    /// Age of the reading relative to `now`. Fixes from the future count as zero age.
    #[must_use]
    pub fn age(&self, now: OffsetDateTime) -> core::time::Duration {
        let age = now - self.timestamp;
        if age.is_negative() {
            core::time::Duration::ZERO
        } else {
            age.unsigned_abs()
        }
    }
}

/// A labeled, timestamped coordinate sample that belongs to a route.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Waypoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Human-readable address label.
    pub address: String,
    /// When the sample was captured.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl Waypoint {
    /// Build a waypoint from a reading and its resolved label.
    pub fn from_reading(reading: &LocationReading, address: impl Into<String>) -> Self {
        Self {
            latitude: reading.coordinate.latitude,
            longitude: reading.coordinate.longitude,
            address: address.into(),
            timestamp: reading.timestamp,
        }
    }

    /// The waypoint position.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Distance to another waypoint in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// A route endpoint: a label with an optional position.
///
/// Endpoints typed in by the user ("manual input") carry only a label.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Place {
    /// Human-readable label.
    pub label: String,
    /// Position, when known.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub coordinate: Option<Coordinate>,
}

impl Place {
    /// A place with a known position.
    pub fn new(label: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            label: label.into(),
            coordinate: Some(coordinate),
        }
    }

    /// A place entered by hand, without a position.
    pub fn manual(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            coordinate: None,
        }
    }
}

impl From<&Waypoint> for Place {
    fn from(waypoint: &Waypoint) -> Self {
        Place::new(waypoint.address.clone(), waypoint.coordinate())
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Location permission state granted by the user.
///
/// `Denied` and `Restricted` cannot be left from inside the app; the user has
/// to change system settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AuthorizationState {
    /// The user has not been asked yet.
    #[default]
    Undetermined,
    /// Location is available while the app is in use.
    WhenInUse,
    /// Location is available in the background too.
    Always,
    /// The user refused.
    Denied,
    /// Location is blocked by policy (parental controls, MDM).
    Restricted,
}

impl AuthorizationState {
    /// Whether location fixes can be requested.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::WhenInUse | Self::Always)
    }

    /// Whether the state can only change outside the app.
    #[must_use]
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }

    /// Whether an elevation request (WhenInUse to Always) makes sense.
    #[must_use]
    pub fn can_elevate(self) -> bool {
        self == Self::WhenInUse
    }

    /// Stable lowercase name, used in logs and storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undetermined => "undetermined",
            Self::WhenInUse => "when_in_use",
            Self::Always => "always",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorizationState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undetermined" => Ok(Self::Undetermined),
            "when_in_use" => Ok(Self::WhenInUse),
            "always" => Ok(Self::Always),
            "denied" => Ok(Self::Denied),
            "restricted" => Ok(Self::Restricted),
            other => Err(ParseError::UnknownAuthorization(other.to_string())),
        }
    }
}

/// Address components returned by reverse geocoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Placemark {
    /// Point-of-interest or street-level name.
    pub name: Option<String>,
    /// Neighbourhood or district.
    pub sub_locality: Option<String>,
    /// City.
    pub locality: Option<String>,
    /// County or prefecture.
    pub sub_administrative_area: Option<String>,
    /// State or province.
    pub administrative_area: Option<String>,
    /// Country name.
    pub country: Option<String>,
}

impl Placemark {
    /// Components used for short labels, in priority order.
    pub fn label_components(&self) -> [Option<&str>; 4] {
        [
            self.name.as_deref(),
            self.sub_locality.as_deref(),
            self.locality.as_deref(),
            self.sub_administrative_area.as_deref(),
        ]
    }
}
