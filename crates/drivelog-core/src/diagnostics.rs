//! Tracking diagnostics.
//!
//! [`DebugSnapshot`] summarizes what the waypoint accumulator accepted and
//! rejected, for bug reports and the CLI's verbose output.
//!
//! # Example
//!
//! ```ignore
//! let snapshot = controller.debug_snapshot().await;
//! println!("{}", snapshot);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drivelog_types::{AuthorizationState, LocationReading, Waypoint};

use crate::address::ResolverStats;

/// Number of waypoints shown from each end of the trail.
pub const SNAPSHOT_EDGE: usize = 3;

/// Counters kept by the waypoint accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Continuous readings appended.
    pub accepted_continuous: u64,
    /// Forced captures appended.
    pub accepted_forced: u64,
    /// Readings rejected for poor or invalid accuracy.
    pub rejected_accuracy: u64,
    /// Continuous readings rejected as too close to the previous waypoint.
    pub rejected_distance: u64,
    /// Continuous readings older than the last waypoint.
    pub rejected_out_of_order: u64,
    /// Forced ticks with no reading to capture.
    pub rejected_no_reading: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Failed flushes.
    pub flush_failures: u64,
}

impl CaptureStats {
    /// Total readings rejected for any reason.
    pub fn total_rejected(&self) -> u64 {
        self.rejected_accuracy
            + self.rejected_distance
            + self.rejected_out_of_order
            + self.rejected_no_reading
    }
}

/// Point-in-time view of the tracking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugSnapshot {
    /// The route being recorded, if any.
    pub route_id: Option<Uuid>,
    /// Number of buffered waypoints.
    pub waypoint_count: usize,
    /// Accumulator counters.
    pub stats: CaptureStats,
    /// The first few waypoints.
    pub first: Vec<Waypoint>,
    /// The last few waypoints.
    pub last: Vec<Waypoint>,
    /// Location permission state.
    pub authorization: AuthorizationState,
    /// Whether continuous tracking is on.
    pub continuous: bool,
    /// The newest fix seen by the provider.
    pub last_known: Option<LocationReading>,
    /// Address resolver counters.
    pub resolver: Option<ResolverStats>,
}

impl DebugSnapshot {
    /// A snapshot with no route.
    pub fn idle(authorization: AuthorizationState, last_known: Option<LocationReading>) -> Self {
        Self {
            route_id: None,
            waypoint_count: 0,
            stats: CaptureStats::default(),
            first: Vec::new(),
            last: Vec::new(),
            authorization,
            continuous: false,
            last_known,
            resolver: None,
        }
    }

    /// Fill the first/last sections from a waypoint trail.
    pub(crate) fn with_trail(mut self, waypoints: &[Waypoint]) -> Self {
        self.waypoint_count = waypoints.len();
        self.first = waypoints.iter().take(SNAPSHOT_EDGE).cloned().collect();
        let tail_start = waypoints.len().saturating_sub(SNAPSHOT_EDGE).max(self.first.len());
        self.last = waypoints[tail_start..].to_vec();
        self
    }
}

fn write_waypoint(f: &mut fmt::Formatter<'_>, index: usize, waypoint: &Waypoint) -> fmt::Result {
    writeln!(
        f,
        "  #{:<4} {:.5},{:.5}  {}  {}",
        index, waypoint.latitude, waypoint.longitude, waypoint.timestamp, waypoint.address
    )
}

impl fmt::Display for DebugSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.route_id {
            Some(id) => writeln!(f, "Route:         {}", id)?,
            None => writeln!(f, "Route:         (none)")?,
        }
        writeln!(f, "Authorization: {}", self.authorization)?;
        writeln!(
            f,
            "Continuous:    {}",
            if self.continuous { "on" } else { "off" }
        )?;
        match &self.last_known {
            Some(reading) => writeln!(
                f,
                "Last fix:      {} ±{:.0} m at {}",
                reading.coordinate, reading.horizontal_accuracy, reading.timestamp
            )?,
            None => writeln!(f, "Last fix:      (none)")?,
        }
        writeln!(
            f,
            "Waypoints:     {} ({} continuous, {} forced)",
            self.waypoint_count, self.stats.accepted_continuous, self.stats.accepted_forced
        )?;
        writeln!(
            f,
            "Rejected:      {} (accuracy {}, distance {}, order {}, no fix {})",
            self.stats.total_rejected(),
            self.stats.rejected_accuracy,
            self.stats.rejected_distance,
            self.stats.rejected_out_of_order,
            self.stats.rejected_no_reading
        )?;
        writeln!(
            f,
            "Flushes:       {} ok, {} failed",
            self.stats.flushes, self.stats.flush_failures
        )?;
        if let Some(resolver) = &self.resolver {
            writeln!(
                f,
                "Addresses:     {} hits, {} misses, {} fallbacks, {} cached",
                resolver.hits, resolver.misses, resolver.fallbacks, resolver.cached_entries
            )?;
        }

        if !self.first.is_empty() {
            writeln!(f, "First points:")?;
            for (i, waypoint) in self.first.iter().enumerate() {
                write_waypoint(f, i, waypoint)?;
            }
        }
        if !self.last.is_empty() {
            writeln!(f, "Last points:")?;
            let offset = self.waypoint_count - self.last.len();
            for (i, waypoint) in self.last.iter().enumerate() {
                write_waypoint(f, offset + i, waypoint)?;
            }
        }
        Ok(())
    }
}
