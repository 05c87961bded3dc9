//! Capability traits the engine is written against.
//!
//! The host platform supplies implementations for location fixes, reverse
//! geocoding, background execution, and route persistence. The [`crate::mock`]
//! module provides deterministic fakes for tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use drivelog_types::{
    AuthorizationState, Coordinate, LocationReading, Place, Placemark, RouteSession, Waypoint,
};

use crate::error::Result;

/// Accuracy level requested from the location hardware.
///
/// Ordered from most to least precise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredAccuracy {
    /// Highest precision plus sensor fusion, highest power draw.
    BestForNavigation,
    /// Highest precision.
    Best,
    /// Within ten meters.
    NearestTenMeters,
    /// Within a hundred meters.
    HundredMeters,
    /// Within a kilometer.
    Kilometer,
}

impl DesiredAccuracy {
    /// The next cheaper accuracy level, used while the app is in the background.
    #[must_use]
    pub fn relaxed(self) -> Self {
        match self {
            Self::BestForNavigation => Self::Best,
            Self::Best => Self::NearestTenMeters,
            Self::NearestTenMeters => Self::HundredMeters,
            Self::HundredMeters | Self::Kilometer => Self::Kilometer,
        }
    }
}

/// Parameters for continuous location updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateParams {
    /// Requested accuracy.
    pub accuracy: DesiredAccuracy,
    /// Minimum movement in meters before the hardware reports a new fix.
    pub distance_filter: f64,
    /// Whether updates should continue while the app is in the background.
    pub allows_background: bool,
}

/// Permission level to ask the user for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionLevel {
    /// Location while the app is in use.
    WhenInUse,
    /// Location in the background too.
    Always,
}

/// Events emitted by the platform location capability.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    /// A new fix, either requested once or from continuous updates.
    Fix(LocationReading),
    /// The hardware failed to produce a fix.
    Failure(String),
    /// The user changed the permission.
    AuthorizationChanged(AuthorizationState),
}

/// Raw platform location capability.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Current permission state.
    fn authorization(&self) -> AuthorizationState;

    /// Ask the user for permission and return the resulting state.
    async fn request_authorization(&self, level: PermissionLevel) -> AuthorizationState;

    /// Ask for a single fix. The answer arrives as a [`LocationEvent`].
    fn request_location(&self) -> Result<()>;

    /// Start continuous updates with the given parameters.
    fn start_updates(&self, params: UpdateParams) -> Result<()>;

    /// Stop continuous updates. Stopping twice is harmless.
    fn stop_updates(&self);

    /// Subscribe to fixes, failures, and permission changes.
    fn subscribe(&self) -> broadcast::Receiver<LocationEvent>;

    /// Whether the host process is currently in the background.
    fn is_backgrounded(&self) -> bool {
        false
    }
}

/// Reverse-geocoding capability.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a coordinate to candidate placemarks, best match first.
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<Vec<Placemark>>;
}

/// Opaque handle for a granted background-execution extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionToken(u64);

impl ExtensionToken {
    /// Wrap a platform identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The platform identifier.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExtensionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ext-{}", self.0)
    }
}

/// Capability to extend processing time while the app is not in the foreground.
#[async_trait]
pub trait BackgroundExecution: Send + Sync {
    /// Begin an extension.
    async fn acquire(&self) -> Result<ExtensionToken>;

    /// Push the expiry of an extension further out.
    async fn renew(&self, token: &ExtensionToken) -> Result<()>;

    /// End an extension.
    async fn release(&self, token: ExtensionToken);
}

/// In-place modification applied to a stored route.
pub type RouteMutator = Box<dyn FnOnce(&mut RouteSession) + Send>;

/// Route persistence collaborator.
#[async_trait]
pub trait RoutePersistence: Send + Sync {
    /// Create and store a new active route.
    ///
    /// Fails if another route is still active; at most one route is active
    /// at a time.
    async fn start_route(&self, start_location: Option<Place>) -> Result<RouteSession>;

    /// Apply `mutator` to the stored route and return the updated record.
    async fn update_route(&self, id: Uuid, mutator: RouteMutator) -> Result<RouteSession>;

    /// Complete the route with its final waypoints.
    async fn end_route(
        &self,
        id: Uuid,
        end_location: Option<Place>,
        waypoints: Vec<Waypoint>,
    ) -> Result<RouteSession>;

    /// The route still marked active, if any.
    async fn current_active_route(&self) -> Result<Option<RouteSession>>;

    /// Delete a route.
    async fn delete_route(&self, id: Uuid) -> Result<()>;

    /// Every stored route, newest first.
    async fn fetch_all_routes(&self) -> Result<Vec<RouteSession>>;

    /// The `limit` newest routes.
    async fn fetch_recent_routes(&self, limit: usize) -> Result<Vec<RouteSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaxed_accuracy_never_gets_more_precise() {
        let levels = [
            DesiredAccuracy::BestForNavigation,
            DesiredAccuracy::Best,
            DesiredAccuracy::NearestTenMeters,
            DesiredAccuracy::HundredMeters,
            DesiredAccuracy::Kilometer,
        ];
        for level in levels {
            assert!(level.relaxed() >= level);
        }
        assert_eq!(
            DesiredAccuracy::Kilometer.relaxed(),
            DesiredAccuracy::Kilometer
        );
    }

    #[test]
    fn test_extension_token_display() {
        assert_eq!(ExtensionToken::new(7).to_string(), "ext-7");
    }
}
