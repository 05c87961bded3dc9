//! Location acquisition on top of a platform [`LocationSource`].
//!
//! The provider owns a background pump task that consumes the source's event
//! stream. It remembers the newest fix, answers the pending one-shot request,
//! and forwards fixes to continuous subscribers while continuous tracking is
//! on.
//!
//! # One-shot requests
//!
//! At most one one-shot request waits for the hardware at a time. A second
//! [`LocationProvider::request_once`] issued while the first is still waiting
//! replaces it: the first caller receives [`Error::Superseded`] at once and its
//! timeout is dropped with it.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use drivelog_core::mock::MockLocationSource;
//! use drivelog_core::{LocationConfig, LocationProvider};
//! use drivelog_types::{AuthorizationState, Coordinate, LocationReading};
//! use time::OffsetDateTime;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), drivelog_core::Error> {
//! let source = Arc::new(MockLocationSource::new(AuthorizationState::WhenInUse));
//! let coord = Coordinate::new(48.8584, 2.2945)?;
//! source.set_one_shot_fix(Some(LocationReading::new(coord, 12.0, OffsetDateTime::now_utc())));
//!
//! let provider = LocationProvider::new(source, LocationConfig::default());
//! let reading = provider
//!     .request_once(Duration::from_secs(5), Duration::from_secs(300))
//!     .await?;
//! assert_eq!(reading.coordinate, coord);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivelog_types::{AuthorizationState, LocationReading};

use crate::config::LocationConfig;
use crate::error::{Error, Result};
use crate::traits::{DesiredAccuracy, LocationEvent, LocationSource, PermissionLevel, UpdateParams};

/// Capacity of the continuous reading channel.
const CONTINUOUS_CHANNEL_CAPACITY: usize = 64;

struct PendingRequest {
    id: u64,
    reply: oneshot::Sender<Result<LocationReading>>,
}

#[derive(Default)]
struct ProviderState {
    last_known: Option<LocationReading>,
    latest_continuous: Option<LocationReading>,
    /// Requested accuracy and distance filter while continuous tracking is on.
    continuous: Option<(DesiredAccuracy, f64)>,
    pending: Option<PendingRequest>,
    next_request_id: u64,
}

struct Shared {
    source: Arc<dyn LocationSource>,
    config: LocationConfig,
    state: Mutex<ProviderState>,
    continuous_tx: broadcast::Sender<LocationReading>,
    authorization_tx: watch::Sender<AuthorizationState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, event: LocationEvent) {
        match event {
            LocationEvent::Fix(reading) => self.handle_fix(reading),
            LocationEvent::Failure(message) => self.handle_failure(message),
            LocationEvent::AuthorizationChanged(state) => self.handle_authorization(state),
        }
    }

    fn handle_fix(&self, reading: LocationReading) {
        let mut state = self.state();
        let newer = state
            .last_known
            .is_none_or(|last| reading.timestamp >= last.timestamp);
        if newer {
            state.last_known = Some(reading);
        }

        if let Some(pending) = state.pending.take() {
            debug!("Answering one-shot request {}", pending.id);
            let _ = pending.reply.send(Ok(reading));
        }

        if state.continuous.is_some() {
            state.latest_continuous = Some(reading);
            // Ignore error if no subscribers
            let _ = self.continuous_tx.send(reading);
        }
    }

    fn handle_failure(&self, message: String) {
        warn!("Location hardware failure: {}", message);
        if let Some(pending) = self.state().pending.take() {
            let _ = pending.reply.send(Err(Error::Unavailable(message)));
        }
    }

    fn handle_authorization(&self, authorization: AuthorizationState) {
        info!("Location authorization changed to {}", authorization);
        self.authorization_tx.send_replace(authorization);
        if authorization.is_blocked()
            && let Some(pending) = self.state().pending.take()
        {
            let _ = pending
                .reply
                .send(Err(Error::PermissionDenied(authorization)));
        }
    }

    fn clear_pending(&self, id: u64) {
        let mut state = self.state();
        if state.pending.as_ref().is_some_and(|p| p.id == id) {
            state.pending = None;
        }
    }
}

/// Timeout-bounded one-shot fixes and a continuous reading stream.
///
/// Dropping the provider stops its pump task.
pub struct LocationProvider {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for LocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("LocationProvider")
            .field("last_known", &state.last_known)
            .field("continuous", &state.continuous)
            .field("pending", &state.pending.as_ref().map(|p| p.id))
            .finish()
    }
}

impl LocationProvider {
    /// Create a provider and start its pump task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(source: Arc<dyn LocationSource>, config: LocationConfig) -> Self {
        let (continuous_tx, _) = broadcast::channel(CONTINUOUS_CHANNEL_CAPACITY);
        let (authorization_tx, _) = watch::channel(source.authorization());
        let mut events = source.subscribe();

        let shared = Arc::new(Shared {
            source,
            config,
            state: Mutex::new(ProviderState::default()),
            continuous_tx,
            authorization_tx,
        });

        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let task_shared = Arc::clone(&shared);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Location pump cancelled");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(event) => task_shared.handle_event(event),
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Location pump lagged, {} events dropped", missed);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Location source closed its event stream");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shared,
            cancel_token,
        }
    }

    /// The configuration this provider was created with.
    pub fn config(&self) -> &LocationConfig {
        &self.shared.config
    }

    // ==================== Authorization ====================

    /// Current permission state.
    pub fn authorization(&self) -> AuthorizationState {
        self.shared.source.authorization()
    }

    /// Watch permission changes.
    pub fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.shared.authorization_tx.subscribe()
    }

    /// Ask for foreground permission if the user has not been asked yet.
    ///
    /// Returns the resulting state; any other state is returned unchanged.
    pub async fn request_permission(&self) -> AuthorizationState {
        let current = self.authorization();
        if current != AuthorizationState::Undetermined {
            return current;
        }
        let state = self
            .shared
            .source
            .request_authorization(PermissionLevel::WhenInUse)
            .await;
        self.shared.authorization_tx.send_replace(state);
        state
    }

    /// Ask to elevate WhenInUse to Always. No-op in any other state.
    pub async fn request_elevated_permission(&self) -> AuthorizationState {
        let current = self.authorization();
        if !current.can_elevate() {
            return current;
        }
        let state = self
            .shared
            .source
            .request_authorization(PermissionLevel::Always)
            .await;
        self.shared.authorization_tx.send_replace(state);
        state
    }

    async fn ensure_authorized(&self) -> Result<()> {
        let state = match self.authorization() {
            AuthorizationState::Undetermined => self.request_permission().await,
            state => state,
        };
        if state.is_granted() {
            Ok(())
        } else {
            Err(Error::PermissionDenied(state))
        }
    }

    // ==================== Cached readings ====================

    /// The newest fix seen, of any age.
    pub fn last_known(&self) -> Option<LocationReading> {
        self.shared.state().last_known
    }

    /// The newest fix if it is at most `staleness` old.
    pub fn fresh_reading(&self, staleness: Duration) -> Option<LocationReading> {
        let now = OffsetDateTime::now_utc();
        self.last_known()
            .filter(|reading| reading.age(now) <= staleness)
    }

    /// The newest fix delivered while continuous tracking was on.
    pub fn most_recent_continuous(&self) -> Option<LocationReading> {
        self.shared.state().latest_continuous
    }

    /// Seed the cache with a fix the host already holds.
    pub fn prime(&self, reading: LocationReading) {
        let mut state = self.shared.state();
        if state
            .last_known
            .is_none_or(|last| reading.timestamp >= last.timestamp)
        {
            state.last_known = Some(reading);
        }
    }

    // ==================== One-shot ====================

    /// Get a single fix within `timeout`.
    ///
    /// A cached fix no older than `staleness` is returned without touching
    /// the hardware.
    ///
    /// # Errors
    ///
    /// - [`Error::PermissionDenied`] if permission is missing or refused
    /// - [`Error::Timeout`] if no fix arrives in time
    /// - [`Error::Unavailable`] if the hardware reports a failure
    /// - [`Error::Superseded`] if a newer request replaced this one
    pub async fn request_once(
        &self,
        timeout: Duration,
        staleness: Duration,
    ) -> Result<LocationReading> {
        if let Some(reading) = self.fresh_reading(staleness) {
            debug!("Serving one-shot request from cache");
            return Ok(reading);
        }

        self.ensure_authorized().await?;

        let (reply, answer) = oneshot::channel();
        let id = {
            let mut state = self.shared.state();
            state.next_request_id += 1;
            let id = state.next_request_id;
            if let Some(previous) = state.pending.replace(PendingRequest { id, reply }) {
                debug!("One-shot request {} superseded by {}", previous.id, id);
                let _ = previous.reply.send(Err(Error::Superseded));
            }
            id
        };

        if let Err(e) = self.shared.source.request_location() {
            warn!("One-shot location request failed: {}", e);
            self.shared.clear_pending(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(result)) => result,
            // The provider shut down while waiting.
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                self.shared.clear_pending(id);
                debug!("One-shot request {} timed out after {:?}", id, timeout);
                Err(Error::timeout("request_once", timeout))
            }
        }
    }

    /// Get a single fix using the configured timeout and staleness threshold.
    pub async fn current_location(&self) -> Result<LocationReading> {
        let config = &self.shared.config;
        self.request_once(config.one_shot_timeout(), config.staleness_threshold())
            .await
    }

    // ==================== Continuous ====================

    /// Start continuous updates.
    ///
    /// Restarting while already running applies the new parameters.
    pub fn start_continuous(&self, accuracy: DesiredAccuracy, distance_filter: f64) -> Result<()> {
        let authorization = self.authorization();
        if authorization.is_blocked() {
            return Err(Error::PermissionDenied(authorization));
        }

        let params = self.update_params(authorization, accuracy, distance_filter);
        self.shared.source.start_updates(params)?;
        self.shared.state().continuous = Some((accuracy, distance_filter));
        info!(
            "Continuous tracking started ({:?}, {} m filter, background: {})",
            params.accuracy, params.distance_filter, params.allows_background
        );
        Ok(())
    }

    /// Start continuous updates with the configured accuracy and filter.
    pub fn start_continuous_default(&self) -> Result<()> {
        let config = &self.shared.config;
        self.start_continuous(config.desired_accuracy, config.distance_filter)
    }

    /// Stop continuous updates. Stopping twice is harmless.
    pub fn stop_continuous(&self) {
        let was_running = self.shared.state().continuous.take().is_some();
        if was_running {
            self.shared.source.stop_updates();
            info!("Continuous tracking stopped");
        }
    }

    /// Reapply continuous parameters after the host moved between
    /// foreground and background.
    pub fn refresh_continuous(&self) -> Result<()> {
        let requested = self.shared.state().continuous;
        match requested {
            Some((accuracy, distance_filter)) => self.start_continuous(accuracy, distance_filter),
            None => Ok(()),
        }
    }

    /// Whether continuous tracking is on.
    pub fn is_continuous(&self) -> bool {
        self.shared.state().continuous.is_some()
    }

    /// Subscribe to readings delivered while continuous tracking is on.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationReading> {
        self.shared.continuous_tx.subscribe()
    }

    fn update_params(
        &self,
        authorization: AuthorizationState,
        accuracy: DesiredAccuracy,
        distance_filter: f64,
    ) -> UpdateParams {
        let allows_background = authorization == AuthorizationState::Always;
        if allows_background && self.shared.source.is_backgrounded() {
            UpdateParams {
                accuracy: accuracy.relaxed(),
                distance_filter: distance_filter * self.shared.config.background_distance_factor,
                allows_background,
            }
        } else {
            UpdateParams {
                accuracy,
                distance_filter,
                allows_background,
            }
        }
    }
}

impl Drop for LocationProvider {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
