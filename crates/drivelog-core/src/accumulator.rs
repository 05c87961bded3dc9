//! Waypoint accumulation for the active route.
//!
//! The accumulator turns location readings into an ordered, append-only
//! waypoint trail and periodically writes the full trail to the persistence
//! collaborator.
//!
//! # Filtering
//!
//! | Source | Accuracy bound | Distance filter | Timestamp |
//! |--------|----------------|-----------------|-----------|
//! | Continuous update | 0..=50 m | at least 5 m from the last waypoint | rejected if older than the last waypoint |
//! | Forced capture (every 10 s) | 0..=100 m | none | `max(now, last waypoint)` |
//!
//! Forced captures keep a slow or stationary vehicle on the map.
//!
//! # Persistence
//!
//! The trail is flushed after the first waypoint, after every forced capture,
//! and after every N continuous waypoints (default 10). A failed incremental
//! flush is logged and reported as [`SessionEvent::PersistenceFailed`]; the
//! next flush rewrites the whole trail.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use drivelog_types::{LocationReading, Place, Waypoint};

use crate::address::AddressResolver;
use crate::config::TrackingConfig;
use crate::diagnostics::{CaptureStats, DebugSnapshot};
use crate::error::Result;
use crate::events::{EventDispatcher, SessionEvent};
use crate::location::LocationProvider;
use crate::traits::{RouteMutator, RoutePersistence};

/// Why a reading was not appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Accuracy negative or above the bound.
    Accuracy,
    /// Too close to the previous waypoint.
    Distance,
    /// Older than the previous waypoint.
    OutOfOrder,
    /// A forced tick found no reading to capture.
    NoReading,
}

/// Result of offering a reading to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// The waypoint was appended.
    Accepted(Waypoint),
    /// The reading was dropped.
    Rejected(RejectReason),
}

impl CaptureOutcome {
    /// Whether a waypoint was appended.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[derive(Default)]
struct Trail {
    waypoints: Vec<Waypoint>,
    since_flush: usize,
    stats: CaptureStats,
}

impl Trail {
    fn last(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }
}

/// Collects waypoints for one route.
pub struct WaypointAccumulator {
    route_id: Uuid,
    config: TrackingConfig,
    provider: Arc<LocationProvider>,
    resolver: Arc<AddressResolver>,
    persistence: Arc<dyn RoutePersistence>,
    events: EventDispatcher,
    trail: Mutex<Trail>,
}

impl std::fmt::Debug for WaypointAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaypointAccumulator")
            .field("route_id", &self.route_id)
            .field("config", &self.config)
            .finish()
    }
}

impl WaypointAccumulator {
    /// Create an accumulator for `route_id` with an empty trail.
    pub fn new(
        route_id: Uuid,
        config: TrackingConfig,
        provider: Arc<LocationProvider>,
        resolver: Arc<AddressResolver>,
        persistence: Arc<dyn RoutePersistence>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            route_id,
            config,
            provider,
            resolver,
            persistence,
            events,
            trail: Mutex::new(Trail::default()),
        }
    }

    /// The route this accumulator belongs to.
    pub fn route_id(&self) -> Uuid {
        self.route_id
    }

    /// Seed the trail with waypoints recovered after a restart.
    pub async fn restore(&self, waypoints: Vec<Waypoint>) {
        let mut trail = self.trail.lock().await;
        info!(
            "Restored {} waypoints for route {}",
            waypoints.len(),
            self.route_id
        );
        trail.waypoints = waypoints;
        trail.since_flush = 0;
    }

    /// A copy of the trail.
    pub async fn waypoints(&self) -> Vec<Waypoint> {
        self.trail.lock().await.waypoints.clone()
    }

    /// Number of buffered waypoints.
    pub async fn len(&self) -> usize {
        self.trail.lock().await.waypoints.len()
    }

    /// Whether the trail is empty.
    pub async fn is_empty(&self) -> bool {
        self.trail.lock().await.waypoints.is_empty()
    }

    /// Accumulator counters.
    pub async fn stats(&self) -> CaptureStats {
        self.trail.lock().await.stats.clone()
    }

    /// Offer a continuous reading.
    pub async fn handle_continuous(&self, reading: LocationReading) -> CaptureOutcome {
        {
            let mut trail = self.trail.lock().await;
            if let Some(reason) = self.check_continuous(&trail, &reading) {
                debug!("Continuous reading rejected: {:?}", reason);
                record_rejection(&mut trail.stats, reason);
                return CaptureOutcome::Rejected(reason);
            }
        }

        let address = self.resolver.resolve(reading.coordinate).await;
        let waypoint = Waypoint::from_reading(&reading, address);
        self.append(waypoint, false).await
    }

    /// Take a forced capture from the provider's newest reading.
    pub async fn handle_forced(&self) -> CaptureOutcome {
        let reading = self
            .provider
            .most_recent_continuous()
            .or_else(|| self.provider.last_known());

        let Some(reading) = reading else {
            debug!("Forced capture skipped, no reading yet");
            let mut trail = self.trail.lock().await;
            record_rejection(&mut trail.stats, RejectReason::NoReading);
            return CaptureOutcome::Rejected(RejectReason::NoReading);
        };

        if !reading.accuracy_within(self.config.max_forced_accuracy) {
            debug!(
                "Forced capture rejected, accuracy {:.1} m",
                reading.horizontal_accuracy
            );
            let mut trail = self.trail.lock().await;
            record_rejection(&mut trail.stats, RejectReason::Accuracy);
            return CaptureOutcome::Rejected(RejectReason::Accuracy);
        }

        let address = self.resolver.resolve(reading.coordinate).await;
        let mut waypoint = Waypoint::from_reading(&reading, address);
        waypoint.timestamp = OffsetDateTime::now_utc();
        self.append(waypoint, true).await
    }

    fn check_continuous(&self, trail: &Trail, reading: &LocationReading) -> Option<RejectReason> {
        if !reading.accuracy_within(self.config.max_continuous_accuracy) {
            return Some(RejectReason::Accuracy);
        }
        let last = trail.last()?;
        if reading.timestamp < last.timestamp {
            return Some(RejectReason::OutOfOrder);
        }
        if reading.coordinate.distance_to(&last.coordinate()) < self.config.min_waypoint_distance {
            return Some(RejectReason::Distance);
        }
        None
    }

    async fn append(&self, mut waypoint: Waypoint, forced: bool) -> CaptureOutcome {
        let (total, flush) = {
            let mut trail = self.trail.lock().await;
            if let Some(last) = trail.last() {
                if forced {
                    waypoint.timestamp = waypoint.timestamp.max(last.timestamp);
                } else if waypoint.timestamp < last.timestamp {
                    // A forced capture landed while the label was resolving.
                    record_rejection(&mut trail.stats, RejectReason::OutOfOrder);
                    return CaptureOutcome::Rejected(RejectReason::OutOfOrder);
                }
            }

            trail.waypoints.push(waypoint.clone());
            if forced {
                trail.stats.accepted_forced += 1;
            } else {
                trail.stats.accepted_continuous += 1;
                trail.since_flush += 1;
            }

            let total = trail.waypoints.len();
            let flush = forced || total == 1 || trail.since_flush >= self.config.flush_every;
            (total, flush)
        };

        debug!(
            "Waypoint #{} appended ({}): {}",
            total,
            if forced { "forced" } else { "continuous" },
            waypoint.address
        );
        self.events.send(SessionEvent::WaypointAdded {
            route_id: self.route_id,
            waypoint: waypoint.clone(),
            total,
            forced,
        });

        if flush {
            // Failures are already logged and reported.
            let _ = self.flush().await;
        }
        CaptureOutcome::Accepted(waypoint)
    }

    /// Write the full trail to the persistence collaborator.
    ///
    /// Also fills in a missing start location from the first waypoint.
    pub async fn flush(&self) -> Result<()> {
        let waypoints = {
            let mut trail = self.trail.lock().await;
            trail.since_flush = 0;
            trail.waypoints.clone()
        };
        let count = waypoints.len();

        let mutator: RouteMutator = Box::new(move |route| {
            if !route.is_active() {
                return;
            }
            if route.start_location.is_none()
                && let Some(first) = waypoints.first()
            {
                route.start_location = Some(Place::from(first));
            }
            route.waypoints = waypoints;
        });

        match self.persistence.update_route(self.route_id, mutator).await {
            Ok(_) => {
                debug!("Flushed {} waypoints for route {}", count, self.route_id);
                self.trail.lock().await.stats.flushes += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to flush route {}: {}", self.route_id, e);
                self.trail.lock().await.stats.flush_failures += 1;
                self.events.send(SessionEvent::PersistenceFailed {
                    route_id: self.route_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Diagnostics for the current trail.
    pub async fn debug_snapshot(&self) -> DebugSnapshot {
        let (waypoints, stats) = {
            let trail = self.trail.lock().await;
            (trail.waypoints.clone(), trail.stats.clone())
        };
        let mut snapshot = DebugSnapshot::idle(
            self.provider.authorization(),
            self.provider.last_known(),
        )
        .with_trail(&waypoints);
        snapshot.route_id = Some(self.route_id);
        snapshot.stats = stats;
        snapshot.continuous = self.provider.is_continuous();
        snapshot.resolver = Some(self.resolver.stats().await);
        snapshot
    }

    /// Run the capture loop on a new task.
    ///
    /// The task consumes the provider's continuous stream and a forced-capture
    /// interval until the returned handle is stopped or dropped.
    pub fn spawn(self: &Arc<Self>) -> AccumulatorHandle {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let accumulator = Arc::clone(self);
        let mut readings = self.provider.subscribe();
        let period = self.config.forced_capture_interval();

        let handle = tokio::spawn(async move {
            let mut forced = tokio::time::interval_at(Instant::now() + period, period);
            forced.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Accumulator for route {} stopped", accumulator.route_id);
                        break;
                    }
                    reading = readings.recv() => match reading {
                        Ok(reading) => {
                            accumulator.handle_continuous(reading).await;
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Accumulator lagged, {} readings dropped", missed);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Continuous stream closed");
                            break;
                        }
                    },
                    _ = forced.tick() => {
                        accumulator.handle_forced().await;
                    }
                }
            }
        });

        AccumulatorHandle {
            handle: Some(handle),
            cancel_token,
        }
    }
}

fn record_rejection(stats: &mut CaptureStats, reason: RejectReason) {
    match reason {
        RejectReason::Accuracy => stats.rejected_accuracy += 1,
        RejectReason::Distance => stats.rejected_distance += 1,
        RejectReason::OutOfOrder => stats.rejected_out_of_order += 1,
        RejectReason::NoReading => stats.rejected_no_reading += 1,
    }
}

/// Handle to a running capture loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct AccumulatorHandle {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl AccumulatorHandle {
    /// Stop the loop and wait for an in-flight capture to finish.
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("Accumulator task ended abnormally: {}", e);
        }
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for AccumulatorHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
