//! Route sessions: one recorded drive from start to end or cancellation.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ParseError;
use crate::types::{Place, Waypoint};

/// Lifecycle status of a route.
///
/// Transitions only go forward: `Active` to `Completed` or `Active` to
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RouteStatus {
    /// The drive is being recorded.
    Active,
    /// The drive ended normally.
    Completed,
    /// The drive was abandoned.
    Cancelled,
}

impl RouteStatus {
    /// Stable lowercase name, used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// A recorded drive.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RouteSession {
    /// Unique route identifier.
    pub id: Uuid,
    /// When recording started.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start_time: OffsetDateTime,
    /// When recording ended or was cancelled.
    #[cfg_attr(feature = "serde", serde(default, with = "time::serde::rfc3339::option"))]
    pub end_time: Option<OffsetDateTime>,
    /// Lifecycle status.
    pub status: RouteStatus,
    /// Where the drive started, if known.
    #[cfg_attr(feature = "serde", serde(default))]
    pub start_location: Option<Place>,
    /// Where the drive ended, if known.
    #[cfg_attr(feature = "serde", serde(default))]
    pub end_location: Option<Place>,
    /// Captured samples in arrival order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub waypoints: Vec<Waypoint>,
    /// Total distance in meters, set when the route ends.
    #[cfg_attr(feature = "serde", serde(default))]
    pub distance: Option<f64>,
    /// Total duration in seconds, set when the route ends.
    #[cfg_attr(feature = "serde", serde(default))]
    pub duration: Option<f64>,
    /// Free-text note.
    #[cfg_attr(feature = "serde", serde(default))]
    pub note: Option<String>,
}

impl RouteSession {
    /// Create a new active route.
    pub fn new(start_time: OffsetDateTime, start_location: Option<Place>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time,
            end_time: None,
            status: RouteStatus::Active,
            start_location,
            end_location: None,
            waypoints: Vec::new(),
            distance: None,
            duration: None,
            note: None,
        }
    }

    /// Whether the route is still being recorded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RouteStatus::Active
    }

    /// Sum of distances between consecutive waypoints, in meters.
    #[must_use]
    pub fn total_distance(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }

    /// Time elapsed since start, measured against `now` (or the end time once ended).
    #[must_use]
    pub fn elapsed(&self, now: OffsetDateTime) -> core::time::Duration {
        let end = self.end_time.unwrap_or(now);
        let elapsed = end - self.start_time;
        if elapsed.is_negative() {
            core::time::Duration::ZERO
        } else {
            elapsed.unsigned_abs()
        }
    }

    /// Mark the route completed.
    ///
    /// Returns `false` and leaves the route untouched if it is not active.
    pub fn complete(
        &mut self,
        end_time: OffsetDateTime,
        end_location: Option<Place>,
        waypoints: Vec<Waypoint>,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        self.end_location = end_location;
        self.finish(RouteStatus::Completed, end_time, waypoints);
        true
    }

    /// Mark the route cancelled, keeping whatever was collected.
    ///
    /// Returns `false` and leaves the route untouched if it is not active.
    pub fn cancel(&mut self, end_time: OffsetDateTime, waypoints: Vec<Waypoint>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.finish(RouteStatus::Cancelled, end_time, waypoints);
        true
    }

    fn finish(&mut self, status: RouteStatus, end_time: OffsetDateTime, waypoints: Vec<Waypoint>) {
        self.waypoints = waypoints;
        self.end_time = Some(end_time);
        self.distance = Some(self.total_distance());
        self.duration = Some(self.elapsed(end_time).as_secs_f64());
        self.status = status;
    }
}
