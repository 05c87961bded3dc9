//! Route-tracking engine for a driving journal.
//!
//! This crate records drives: it acquires location fixes from the host,
//! turns them into a clean trail of waypoints, labels places with
//! human-readable addresses, keeps the app alive in the background while a
//! drive is in progress, and persists everything through a storage backend.
//!
//! # Features
//!
//! - **Location acquisition**: Permission handling, one-shot fixes with
//!   timeouts and a staleness cache, continuous updates
//! - **Waypoint capture**: Accuracy and distance filtering, periodic forced
//!   captures, batched persistence
//! - **Address labels**: Reverse geocoding with a TTL cache and a regional
//!   fallback when the geocoder is unavailable
//! - **Background execution**: Extensions held and renewed for exactly as
//!   long as a drive is active
//! - **Session lifecycle**: Start, end with retries, cancel, and recovery of a
//!   drive left active by a previous process
//!
//! # Host Capabilities
//!
//! The engine is platform-neutral. Hosts provide four capabilities:
//!
//! | Trait | Provides |
//! |-------|----------|
//! | [`LocationSource`] | GPS hardware and permission prompts |
//! | [`Geocoder`] | Reverse geocoding |
//! | [`BackgroundExecution`] | Background time extensions |
//! | [`RoutePersistence`] | Route storage |
//!
//! The [`mock`] module implements all four for tests and demos.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use drivelog_core::mock::{
//!     MemoryRouteStore, MockBackgroundExecution, MockGeocoder, MockLocationSource,
//! };
//! use drivelog_core::{Collaborators, Config, EndOutcome, RouteSessionController};
//! use drivelog_types::{AuthorizationState, Place};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collaborators = Collaborators {
//!         location: Arc::new(MockLocationSource::new(AuthorizationState::WhenInUse)),
//!         geocoder: Arc::new(MockGeocoder::with_place("Main Street", "Springfield")),
//!         background: Arc::new(MockBackgroundExecution::new()),
//!         persistence: Arc::new(MemoryRouteStore::new()),
//!     };
//!     let controller = RouteSessionController::initialize(collaborators, Config::default()).await?;
//!
//!     controller.start(None).await?;
//!     // ... drive ...
//!     if let EndOutcome::Completed(route) = controller.end(Some(Place::manual("Home"))).await? {
//!         println!("Drove {:.0} m", route.distance.unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod address;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod geocoder;
pub mod guard;
pub mod location;
pub mod mock;
pub mod retry;
pub mod traits;
pub mod util;

// Core exports
pub use accumulator::{AccumulatorHandle, CaptureOutcome, RejectReason, WaypointAccumulator};
pub use address::{AddressCache, AddressResolver, ResolverStats, UNKNOWN_LOCATION};
pub use config::{
    AddressConfig, BackgroundConfig, Config, ConfigError, LocationConfig, SessionConfig,
    TrackingConfig, ValidationError, default_config_path,
};
pub use controller::{Collaborators, DriveState, EndOutcome, RouteSessionController, SessionPhase};
pub use diagnostics::{CaptureStats, DebugSnapshot};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SessionEvent};
pub use geocoder::OfflineGeocoder;
#[cfg(feature = "http-geocoder")]
pub use geocoder::NominatimGeocoder;
pub use guard::BackgroundExecutionGuard;
pub use location::LocationProvider;
pub use retry::{RetryConfig, with_retry};
pub use traits::{
    BackgroundExecution, DesiredAccuracy, ExtensionToken, Geocoder, LocationEvent,
    LocationSource, PermissionLevel, RouteMutator, RoutePersistence, UpdateParams,
};
pub use util::{format_distance, format_elapsed};

// Re-export from drivelog-types
pub use drivelog_types::{
    AuthorizationState, Coordinate, LocationReading, Place, Placemark, RouteSession, RouteStatus,
    Waypoint,
};

/// Type alias for a shared controller reference.
pub type SharedController = std::sync::Arc<RouteSessionController>;
