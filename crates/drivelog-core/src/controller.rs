//! Drive session state machine.
//!
//! [`RouteSessionController`] is the single entry point for the UI layer. It
//! starts, ends, and cancels drives, and orchestrates the location provider,
//! address resolver, waypoint accumulator, background guard, and route
//! persistence while a drive is active.
//!
//! # Phases
//!
//! ```text
//! Idle ──start──▶ Active ──end──▶ Ending ──▶ Completed
//!                   │  ▲            │
//!                   │  └────────────┘  no end location / terminal write failed
//!                   └──cancel──▶ Cancelled
//! ```
//!
//! Completed and Cancelled accept a new `start()`. Commands that do not apply
//! to the current phase are no-ops, not errors. Commands are serialized: a
//! command issued while another is running waits for it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use drivelog_types::{AuthorizationState, LocationReading, Place, RouteSession, Waypoint};

use crate::accumulator::{AccumulatorHandle, WaypointAccumulator};
use crate::address::AddressResolver;
use crate::config::Config;
use crate::diagnostics::DebugSnapshot;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SessionEvent};
use crate::guard::BackgroundExecutionGuard;
use crate::location::LocationProvider;
use crate::retry::{RetryConfig, with_retry};
use crate::traits::{BackgroundExecution, Geocoder, LocationSource, RoutePersistence};
use crate::util::format_elapsed;

/// Platform capabilities the controller is built on.
#[derive(Clone)]
pub struct Collaborators {
    /// Location hardware.
    pub location: Arc<dyn LocationSource>,
    /// Reverse geocoding.
    pub geocoder: Arc<dyn Geocoder>,
    /// Background execution extensions.
    pub background: Arc<dyn BackgroundExecution>,
    /// Route storage.
    pub persistence: Arc<dyn RoutePersistence>,
}

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No drive has been recorded yet.
    #[default]
    Idle,
    /// A drive is being recorded.
    Active,
    /// The end location is being determined.
    Ending,
    /// The last drive ended normally.
    Completed,
    /// The last drive was cancelled.
    Cancelled,
}

impl SessionPhase {
    /// Whether a drive is in progress.
    pub fn is_driving(self) -> bool {
        matches!(self, Self::Active | Self::Ending)
    }
}

/// Observable drive state for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveState {
    /// Whether a drive is in progress.
    pub is_driving: bool,
    /// Controller phase.
    pub phase: SessionPhase,
    /// The drive in progress, as of its last lifecycle change.
    pub current_route: Option<RouteSession>,
    /// Time since the drive started, `HH:MM:SS`.
    pub elapsed_display: String,
    /// Waypoints captured so far.
    pub waypoint_count: usize,
}

impl Default for DriveState {
    fn default() -> Self {
        Self {
            is_driving: false,
            phase: SessionPhase::Idle,
            current_route: None,
            elapsed_display: format_elapsed(Duration::ZERO),
            waypoint_count: 0,
        }
    }
}

/// Result of ending a drive.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// The drive was completed and stored.
    Completed(RouteSession),
    /// No end location could be determined. The drive is still active; end
    /// it again with a manually entered place.
    ManualInputRequired,
    /// No drive was active.
    NotActive,
}

struct Ticker {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl Ticker {
    async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct ActiveSession {
    route: RouteSession,
    accumulator: Arc<WaypointAccumulator>,
    capture: Option<AccumulatorHandle>,
    ticker: Ticker,
}

impl ActiveSession {
    async fn pause_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
    }

    fn resume_capture(&mut self) {
        if self.capture.is_none() {
            self.capture = Some(self.accumulator.spawn());
        }
    }
}

struct ControllerState {
    phase: SessionPhase,
    session: Option<ActiveSession>,
    guard: BackgroundExecutionGuard,
}

/// Top-level drive session state machine.
pub struct RouteSessionController {
    config: Config,
    provider: Arc<LocationProvider>,
    resolver: Arc<AddressResolver>,
    persistence: Arc<dyn RoutePersistence>,
    events: EventDispatcher,
    state: Mutex<ControllerState>,
    // Readable while a command holds `state`.
    accumulator: RwLock<Option<Arc<WaypointAccumulator>>>,
    drive_state: Arc<watch::Sender<DriveState>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for RouteSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSessionController")
            .field("state", &*self.drive_state.borrow())
            .finish()
    }
}

impl RouteSessionController {
    /// Validate `config` and create an idle controller.
    ///
    /// Must be called from within a tokio runtime. Use
    /// [`initialize`](Self::initialize) to also re-adopt a drive left active
    /// by a previous process.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(collaborators: Collaborators, config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;

        let events = EventDispatcher::new(config.session.event_capacity);
        let provider = Arc::new(LocationProvider::new(
            collaborators.location,
            config.location.clone(),
        ));
        let resolver = Arc::new(AddressResolver::new(
            collaborators.geocoder,
            config.address.clone(),
        ));
        let guard = BackgroundExecutionGuard::new(
            collaborators.background,
            config.background.renew_interval(),
            events.clone(),
        );
        let (drive_state, _) = watch::channel(DriveState::default());

        let cancel_token = CancellationToken::new();
        spawn_authorization_forwarder(&provider, events.clone(), cancel_token.clone());

        Ok(Self {
            config,
            provider,
            resolver,
            persistence: collaborators.persistence,
            events,
            state: Mutex::new(ControllerState {
                phase: SessionPhase::Idle,
                session: None,
                guard,
            }),
            accumulator: RwLock::new(None),
            drive_state: Arc::new(drive_state),
            cancel_token,
        })
    }

    /// Validate `config`, create a controller, and re-adopt any active drive.
    ///
    /// A failed recovery is logged and the controller starts idle; the next
    /// [`start`](Self::start) tries again.
    pub async fn initialize(collaborators: Collaborators, config: Config) -> Result<Self> {
        let controller = Self::new(collaborators, config)?;
        match controller.recover_active_session().await {
            Ok(Some(route)) => info!("Resumed drive {}", route.id),
            Ok(None) => debug!("No drive to resume"),
            Err(e) => warn!("Failed to recover active drive: {}", e),
        }
        Ok(controller)
    }

    // ==================== Commands ====================

    /// Start a drive.
    ///
    /// Returns `Ok(None)` without side effects if a drive is already in
    /// progress. If storage still holds an active drive this controller is
    /// not recording, that drive is re-adopted instead and `Ok(None)` is
    /// returned. The start location is `override_location` if given,
    /// otherwise the freshest cached fix (never a blocking request), and
    /// otherwise left empty.
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] if location permission is refused;
    /// persistence errors from creating the route.
    pub async fn start(&self, override_location: Option<Place>) -> Result<Option<RouteSession>> {
        let mut state = self.state.lock().await;
        if state.phase.is_driving() {
            debug!("start() ignored, a drive is already in progress");
            return Ok(None);
        }
        if let Some(route) = self.persistence.current_active_route().await? {
            warn!("Drive {} is still active in storage, resuming it", route.id);
            self.adopt(&mut state, route).await;
            return Ok(None);
        }

        let authorization = match self.provider.authorization() {
            AuthorizationState::Undetermined => self.provider.request_permission().await,
            authorization => authorization,
        };
        if !authorization.is_granted() {
            warn!("Cannot start a drive, location permission is {}", authorization);
            return Err(Error::PermissionDenied(authorization));
        }

        let start_location = match override_location {
            Some(place) => Some(place),
            None => self.start_place().await,
        };
        let route = self.persistence.start_route(start_location).await?;
        info!(
            "Drive {} started at {}",
            route.id,
            route
                .start_location
                .as_ref()
                .map_or("unknown location", |p| p.label.as_str())
        );

        self.activate(&mut state, route.clone(), Vec::new()).await;
        self.events.send(SessionEvent::Started {
            route_id: route.id,
            start_location: route.start_location.as_ref().map(|p| p.label.clone()),
        });

        if authorization.can_elevate()
            && self.provider.request_elevated_permission().await == AuthorizationState::Always
            && let Err(e) = self.provider.refresh_continuous()
        {
            warn!("Failed to enable background tracking: {}", e);
        }

        Ok(Some(route))
    }

    /// End the active drive.
    ///
    /// The end location is `override_location` if given, otherwise the most
    /// recent continuous fix, otherwise a one-shot fix retried with the
    /// configured attempts and timeout.
    ///
    /// # Errors
    ///
    /// Persistence errors from the terminal write. The drive stays active.
    pub async fn end(&self, override_location: Option<Place>) -> Result<EndOutcome> {
        let session = &self.config.session;
        self.end_inner(
            override_location,
            session.end_max_attempts,
            session.end_attempt_timeout(),
        )
        .await
    }

    /// End the active drive, trying up to `max_attempts` one-shot fixes of
    /// `per_attempt_timeout` each for the end location.
    ///
    /// When every attempt fails, [`SessionEvent::ManualInputRequired`] is
    /// emitted once and the drive stays active.
    pub async fn end_with_retries(
        &self,
        max_attempts: u32,
        per_attempt_timeout: Duration,
    ) -> Result<EndOutcome> {
        self.end_inner(None, max_attempts, per_attempt_timeout)
            .await
    }

    /// Cancel the active drive, keeping the waypoints collected so far.
    ///
    /// Returns `Ok(None)` if no drive is active.
    pub async fn cancel(&self) -> Result<Option<RouteSession>> {
        let mut state = self.state.lock().await;
        if state.phase != SessionPhase::Active {
            debug!("cancel() ignored in phase {:?}", state.phase);
            return Ok(None);
        }
        let Some(session) = state.session.as_mut() else {
            return Ok(None);
        };

        session.pause_capture().await;
        let route_id = session.route.id;
        let waypoints = session.accumulator.waypoints().await;
        let ended_at = OffsetDateTime::now_utc();

        let result = self
            .persistence
            .update_route(
                route_id,
                Box::new(move |route| {
                    route.cancel(ended_at, waypoints);
                }),
            )
            .await;

        match result {
            Ok(route) => {
                self.teardown(&mut state, SessionPhase::Cancelled).await;
                info!("Drive {} cancelled", route_id);
                self.events.send(SessionEvent::Cancelled { route_id });
                Ok(Some(route))
            }
            Err(e) => {
                warn!("Failed to cancel drive {}: {}", route_id, e);
                if let Some(session) = state.session.as_mut() {
                    session.resume_capture();
                }
                Err(e)
            }
        }
    }

    /// Re-adopt a drive still marked active in storage.
    ///
    /// Returns the recovered route, or `None` if there was nothing to recover
    /// or a drive is already in progress.
    pub async fn recover_active_session(&self) -> Result<Option<RouteSession>> {
        let mut state = self.state.lock().await;
        if state.phase.is_driving() {
            return Ok(None);
        }

        let Some(route) = self.persistence.current_active_route().await? else {
            return Ok(None);
        };
        self.adopt(&mut state, route.clone()).await;
        Ok(Some(route))
    }

    /// Attach a note to the active drive.
    pub async fn set_note(&self, note: impl Into<String>) -> Result<Option<RouteSession>> {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return Ok(None);
        };

        let note = note.into();
        let stored = note.clone();
        let route = self
            .persistence
            .update_route(
                session.route.id,
                Box::new(move |route| route.note = Some(stored)),
            )
            .await?;
        session.route.note = Some(note);
        self.publish(&state).await;
        Ok(Some(route))
    }

    /// Reapply tracking parameters after the host moved between foreground
    /// and background.
    pub fn refresh_tracking(&self) -> Result<()> {
        self.provider.refresh_continuous()
    }

    // ==================== Queries ====================

    /// Current drive state.
    pub fn state(&self) -> DriveState {
        self.drive_state.borrow().clone()
    }

    /// Watch drive state changes, including the once-per-second elapsed time.
    pub fn subscribe_state(&self) -> watch::Receiver<DriveState> {
        self.drive_state.subscribe()
    }

    /// Subscribe to session events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Current phase.
    pub async fn phase(&self) -> SessionPhase {
        self.drive_state.borrow().phase
    }

    /// Waypoints of the active drive.
    pub async fn current_waypoints(&self) -> Vec<Waypoint> {
        match self.active_accumulator() {
            Some(accumulator) => accumulator.waypoints().await,
            None => Vec::new(),
        }
    }

    /// The `limit` newest stored drives.
    pub async fn recent_routes(&self, limit: usize) -> Result<Vec<RouteSession>> {
        self.persistence.fetch_recent_routes(limit).await
    }

    /// Every stored drive, newest first.
    pub async fn all_routes(&self) -> Result<Vec<RouteSession>> {
        self.persistence.fetch_all_routes().await
    }

    /// Delete a stored drive. The active drive cannot be deleted.
    pub async fn delete_route(&self, id: Uuid) -> Result<()> {
        let active = self
            .active_accumulator()
            .is_some_and(|a| a.route_id() == id);
        if active {
            return Err(Error::persistence(format!(
                "route {} is being recorded; end or cancel it first",
                id
            )));
        }
        self.persistence.delete_route(id).await
    }

    /// Diagnostics for the tracking pipeline.
    pub async fn debug_snapshot(&self) -> DebugSnapshot {
        match self.active_accumulator() {
            Some(accumulator) => accumulator.debug_snapshot().await,
            None => {
                let mut snapshot =
                    DebugSnapshot::idle(self.provider.authorization(), self.provider.last_known());
                snapshot.continuous = self.provider.is_continuous();
                snapshot.resolver = Some(self.resolver.stats().await);
                snapshot
            }
        }
    }

    /// The location provider.
    pub fn provider(&self) -> &Arc<LocationProvider> {
        &self.provider
    }

    /// The address resolver.
    pub fn resolver(&self) -> &Arc<AddressResolver> {
        &self.resolver
    }

    // ==================== Internals ====================

    fn active_accumulator(&self) -> Option<Arc<WaypointAccumulator>> {
        self.accumulator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active_accumulator(&self, accumulator: Option<Arc<WaypointAccumulator>>) {
        *self
            .accumulator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = accumulator;
    }

    async fn adopt(&self, state: &mut MutexGuard<'_, ControllerState>, route: RouteSession) {
        let waypoints = route.waypoints.clone();
        let waypoint_count = waypoints.len();
        let route_id = route.id;
        self.activate(state, route, waypoints).await;
        info!(
            "Recovered drive {} with {} waypoints",
            route_id, waypoint_count
        );
        self.events.send(SessionEvent::Recovered {
            route_id,
            waypoint_count,
        });
    }

    async fn end_inner(
        &self,
        override_location: Option<Place>,
        max_attempts: u32,
        per_attempt_timeout: Duration,
    ) -> Result<EndOutcome> {
        let mut state = self.state.lock().await;
        if state.phase != SessionPhase::Active {
            debug!("end() ignored in phase {:?}", state.phase);
            return Ok(EndOutcome::NotActive);
        }
        let Some(route_id) = state.session.as_ref().map(|s| s.route.id) else {
            return Ok(EndOutcome::NotActive);
        };

        state.phase = SessionPhase::Ending;
        self.publish(&state).await;

        let end_location = match override_location {
            Some(place) => place,
            None => match self.locate_end(max_attempts, per_attempt_timeout).await {
                (Ok(reading), _) => self.place_for(&reading).await,
                (Err(e), attempts) => {
                    warn!(
                        "No end location for drive {} after {} attempts: {}",
                        route_id, attempts, e
                    );
                    state.phase = SessionPhase::Active;
                    self.publish(&state).await;
                    self.events.send(SessionEvent::ManualInputRequired { route_id, attempts });
                    return Ok(EndOutcome::ManualInputRequired);
                }
            },
        };

        self.complete(&mut state, end_location).await
    }

    async fn complete(
        &self,
        state: &mut MutexGuard<'_, ControllerState>,
        end_location: Place,
    ) -> Result<EndOutcome> {
        let Some(session) = state.session.as_mut() else {
            return Ok(EndOutcome::NotActive);
        };

        session.pause_capture().await;
        let route_id = session.route.id;
        let waypoints = session.accumulator.waypoints().await;

        match self
            .persistence
            .end_route(route_id, Some(end_location), waypoints)
            .await
        {
            Ok(route) => {
                self.teardown(state, SessionPhase::Completed).await;
                info!(
                    "Drive {} completed: {:.0} m in {:.0} s",
                    route_id,
                    route.distance.unwrap_or_default(),
                    route.duration.unwrap_or_default()
                );
                self.events.send(SessionEvent::Ended {
                    route_id,
                    distance: route.distance.unwrap_or_default(),
                    duration: route.duration.unwrap_or_default(),
                });
                Ok(EndOutcome::Completed(route))
            }
            Err(e) => {
                warn!("Failed to store the end of drive {}: {}", route_id, e);
                if let Some(session) = state.session.as_mut() {
                    session.resume_capture();
                }
                state.phase = SessionPhase::Active;
                self.publish(state).await;
                Err(e)
            }
        }
    }

    /// The end-of-drive fix and the number of one-shot attempts made.
    async fn locate_end(
        &self,
        max_attempts: u32,
        per_attempt_timeout: Duration,
    ) -> (Result<LocationReading>, u32) {
        let staleness = self.config.location.staleness_threshold();
        let now = OffsetDateTime::now_utc();
        if let Some(reading) = self.provider.most_recent_continuous()
            && reading.age(now) <= staleness
        {
            return (Ok(reading), 0);
        }

        let attempts = AtomicU32::new(0);
        let retry = RetryConfig::for_end_location(max_attempts, self.config.session.end_retry_delay());
        let result = with_retry(&retry, "end_location", || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.provider.request_once(per_attempt_timeout, staleness)
        })
        .await;
        (result, attempts.into_inner())
    }

    async fn start_place(&self) -> Option<Place> {
        let reading = self
            .provider
            .fresh_reading(self.config.location.staleness_threshold())?;
        Some(self.place_for(&reading).await)
    }

    async fn place_for(&self, reading: &LocationReading) -> Place {
        let label = self.resolver.resolve(reading.coordinate).await;
        Place::new(label, reading.coordinate)
    }

    async fn activate(
        &self,
        state: &mut MutexGuard<'_, ControllerState>,
        route: RouteSession,
        restored: Vec<Waypoint>,
    ) {
        let accumulator = Arc::new(WaypointAccumulator::new(
            route.id,
            self.config.tracking.clone(),
            Arc::clone(&self.provider),
            Arc::clone(&self.resolver),
            Arc::clone(&self.persistence),
            self.events.clone(),
        ));
        if !restored.is_empty() {
            accumulator.restore(restored).await;
        }

        if let Err(e) = state.guard.open().await {
            warn!("Continuing without background execution: {}", e);
        }

        // Subscribe before updates start so no early fix is missed.
        let capture = accumulator.spawn();
        if let Err(e) = self.provider.start_continuous_default() {
            warn!("Continuous tracking unavailable: {}", e);
        }
        let ticker = self.spawn_ticker(route.start_time, Arc::clone(&accumulator));
        self.set_active_accumulator(Some(Arc::clone(&accumulator)));

        state.session = Some(ActiveSession {
            route,
            accumulator,
            capture: Some(capture),
            ticker,
        });
        state.phase = SessionPhase::Active;
        self.publish(state).await;
    }

    async fn teardown(&self, state: &mut MutexGuard<'_, ControllerState>, phase: SessionPhase) {
        if let Some(mut session) = state.session.take() {
            session.pause_capture().await;
            session.ticker.stop().await;
        }
        self.set_active_accumulator(None);
        self.provider.stop_continuous();
        state.guard.close().await;
        state.phase = phase;
        self.publish(state).await;
    }

    async fn publish(&self, state: &ControllerState) {
        let next = match &state.session {
            Some(session) => DriveState {
                is_driving: state.phase.is_driving(),
                phase: state.phase,
                current_route: Some(session.route.clone()),
                elapsed_display: format_elapsed(elapsed_since(session.route.start_time)),
                waypoint_count: session.accumulator.len().await,
            },
            None => DriveState {
                phase: state.phase,
                ..DriveState::default()
            },
        };
        self.drive_state.send_replace(next);
    }

    fn spawn_ticker(
        &self,
        start_time: OffsetDateTime,
        accumulator: Arc<WaypointAccumulator>,
    ) -> Ticker {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let drive_state = Arc::clone(&self.drive_state);
        let period = self.config.session.elapsed_refresh();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let count = accumulator.len().await;
                        let elapsed = format_elapsed(elapsed_since(start_time));
                        drive_state.send_modify(|state| {
                            state.elapsed_display = elapsed;
                            state.waypoint_count = count;
                        });
                    }
                }
            }
        });

        Ticker {
            handle: Some(handle),
            cancel_token,
        }
    }
}

impl Drop for RouteSessionController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn elapsed_since(start: OffsetDateTime) -> Duration {
    let elapsed = OffsetDateTime::now_utc() - start;
    if elapsed.is_negative() {
        Duration::ZERO
    } else {
        elapsed.unsigned_abs()
    }
}

fn spawn_authorization_forwarder(
    provider: &LocationProvider,
    events: EventDispatcher,
    cancel_token: CancellationToken,
) {
    let mut changes = provider.subscribe_authorization();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *changes.borrow_and_update();
                    events.send(SessionEvent::AuthorizationChanged { state });
                }
            }
        }
    });
}
