//! Mock capability implementations for testing.
//!
//! This module provides deterministic fakes for every capability trait so the
//! engine can be exercised without location hardware, a network geocoder, or
//! a database.
//!
//! # Features
//!
//! - **Failure injection**: make one-shot requests, geocoding, renewals, or
//!   persistence fail on demand
//! - **Latency simulation**: delay geocoder answers and one-shot fixes to
//!   exercise timeouts
//! - **Call counters**: assert how often the engine touched each capability

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use drivelog_types::{
    AuthorizationState, Coordinate, LocationReading, Place, Placemark, RouteSession, Waypoint,
};

use crate::error::{Error, Result};
use crate::traits::{
    BackgroundExecution, ExtensionToken, Geocoder, LocationEvent, LocationSource, PermissionLevel,
    RouteMutator, RoutePersistence, UpdateParams,
};

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ==================== Location ====================

/// A scripted location source.
///
/// Fixes are pushed with [`emit_fix`](Self::emit_fix). One-shot requests are
/// answered automatically only when a response was configured with
/// [`set_one_shot_fix`](Self::set_one_shot_fix); otherwise they go unanswered,
/// which is how a timeout is simulated.
///
/// # Example
///
/// ```
/// use drivelog_core::mock::MockLocationSource;
/// use drivelog_core::LocationSource;
/// use drivelog_types::AuthorizationState;
///
/// let source = MockLocationSource::new(AuthorizationState::WhenInUse);
/// assert_eq!(source.authorization(), AuthorizationState::WhenInUse);
/// assert_eq!(source.location_requests(), 0);
/// ```
pub struct MockLocationSource {
    events: broadcast::Sender<LocationEvent>,
    authorization: RwLock<AuthorizationState>,
    /// State returned by the next permission prompt.
    grant: RwLock<AuthorizationState>,
    one_shot_fix: RwLock<Option<LocationReading>>,
    one_shot_latency_ms: AtomicU64,
    updates: RwLock<Option<UpdateParams>>,
    backgrounded: AtomicBool,
    should_fail: AtomicBool,
    location_requests: AtomicU32,
    permission_requests: AtomicU32,
    start_requests: AtomicU32,
}

impl std::fmt::Debug for MockLocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLocationSource")
            .field("authorization", &read(&self.authorization))
            .field("updates", &read(&self.updates))
            .field("location_requests", &self.location_requests())
            .finish()
    }
}

impl MockLocationSource {
    /// Create a source with the given permission state.
    pub fn new(authorization: AuthorizationState) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            authorization: RwLock::new(authorization),
            grant: RwLock::new(AuthorizationState::WhenInUse),
            one_shot_fix: RwLock::new(None),
            one_shot_latency_ms: AtomicU64::new(0),
            updates: RwLock::new(None),
            backgrounded: AtomicBool::new(false),
            should_fail: AtomicBool::new(false),
            location_requests: AtomicU32::new(0),
            permission_requests: AtomicU32::new(0),
            start_requests: AtomicU32::new(0),
        }
    }

    /// Deliver a fix as the hardware would.
    pub fn emit_fix(&self, reading: LocationReading) {
        let _ = self.events.send(LocationEvent::Fix(reading));
    }

    /// Deliver a fix at `coordinate` with `accuracy`, stamped now.
    pub fn emit_at(&self, coordinate: Coordinate, accuracy: f64) {
        self.emit_fix(LocationReading::new(
            coordinate,
            accuracy,
            OffsetDateTime::now_utc(),
        ));
    }

    /// Deliver a hardware failure.
    pub fn emit_failure(&self, message: &str) {
        let _ = self.events.send(LocationEvent::Failure(message.to_string()));
    }

    /// Change the permission state, as if the user changed it in settings.
    pub fn set_authorization(&self, state: AuthorizationState) {
        write(&self.authorization, state);
        let _ = self.events.send(LocationEvent::AuthorizationChanged(state));
    }

    /// Set the state the next permission prompt resolves to.
    pub fn set_grant(&self, state: AuthorizationState) {
        write(&self.grant, state);
    }

    /// Answer one-shot requests with `reading` (restamped at answer time).
    pub fn set_one_shot_fix(&self, reading: Option<LocationReading>) {
        write(&self.one_shot_fix, reading);
    }

    /// Delay automatic one-shot answers.
    pub fn set_one_shot_latency(&self, latency: Duration) {
        self.one_shot_latency_ms
            .store(millis(latency), Ordering::Relaxed);
    }

    /// Mark the host process as backgrounded or foregrounded.
    pub fn set_backgrounded(&self, backgrounded: bool) {
        self.backgrounded.store(backgrounded, Ordering::Relaxed);
    }

    /// Make one-shot and continuous requests fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Parameters of the running continuous updates, if any.
    pub fn active_updates(&self) -> Option<UpdateParams> {
        read(&self.updates)
    }

    /// Whether continuous updates are running.
    pub fn is_updating(&self) -> bool {
        self.active_updates().is_some()
    }

    /// Number of one-shot hardware requests.
    pub fn location_requests(&self) -> u32 {
        self.location_requests.load(Ordering::Relaxed)
    }

    /// Number of permission prompts shown.
    pub fn permission_requests(&self) -> u32 {
        self.permission_requests.load(Ordering::Relaxed)
    }

    /// Number of times continuous updates were (re)started.
    pub fn start_requests(&self) -> u32 {
        self.start_requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LocationSource for MockLocationSource {
    fn authorization(&self) -> AuthorizationState {
        read(&self.authorization)
    }

    async fn request_authorization(&self, level: PermissionLevel) -> AuthorizationState {
        self.permission_requests.fetch_add(1, Ordering::Relaxed);
        let current = self.authorization();
        if current.is_blocked() {
            return current;
        }
        let granted = match (level, read(&self.grant)) {
            // A WhenInUse prompt never yields background permission.
            (PermissionLevel::WhenInUse, AuthorizationState::Always) => {
                AuthorizationState::WhenInUse
            }
            (_, state) => state,
        };
        self.set_authorization(granted);
        granted
    }

    fn request_location(&self) -> Result<()> {
        self.location_requests.fetch_add(1, Ordering::Relaxed);
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::unavailable("mock location hardware failure"));
        }

        if let Some(reading) = read(&self.one_shot_fix) {
            let sender = self.events.clone();
            let latency = Duration::from_millis(self.one_shot_latency_ms.load(Ordering::Relaxed));
            let answer = move || {
                let fix = LocationReading::new(
                    reading.coordinate,
                    reading.horizontal_accuracy,
                    OffsetDateTime::now_utc(),
                );
                let _ = sender.send(LocationEvent::Fix(fix));
            };
            if latency.is_zero() {
                answer();
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    answer();
                });
            }
        }
        Ok(())
    }

    fn start_updates(&self, params: UpdateParams) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::unavailable("mock location hardware failure"));
        }
        self.start_requests.fetch_add(1, Ordering::Relaxed);
        write(&self.updates, Some(params));
        Ok(())
    }

    fn stop_updates(&self) {
        write(&self.updates, None);
    }

    fn subscribe(&self) -> broadcast::Receiver<LocationEvent> {
        self.events.subscribe()
    }

    fn is_backgrounded(&self) -> bool {
        self.backgrounded.load(Ordering::Relaxed)
    }
}

// ==================== Geocoding ====================

/// A geocoder returning a fixed placemark.
#[derive(Debug)]
pub struct MockGeocoder {
    placemarks: RwLock<Vec<Placemark>>,
    should_fail: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicU32,
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockGeocoder {
    /// Create a geocoder answering every request with `placemarks`.
    pub fn new(placemarks: Vec<Placemark>) -> Self {
        Self {
            placemarks: RwLock::new(placemarks),
            should_fail: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Create a geocoder answering with a single placemark named `name` in `locality`.
    pub fn with_place(name: &str, locality: &str) -> Self {
        Self::new(vec![Placemark {
            name: Some(name.to_string()),
            locality: Some(locality.to_string()),
            ..Default::default()
        }])
    }

    /// Replace the answer.
    pub fn set_placemarks(&self, placemarks: Vec<Placemark>) {
        write(&self.placemarks, placemarks);
    }

    /// Make every request fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Delay every answer.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(millis(latency), Ordering::Relaxed);
    }

    /// Number of reverse-geocoding calls.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn reverse_geocode(&self, _coordinate: Coordinate) -> Result<Vec<Placemark>> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::ResolutionUnavailable("mock geocoder failure".to_string()));
        }
        Ok(read(&self.placemarks))
    }
}

// ==================== Background execution ====================

/// A background-execution capability that counts grants.
#[derive(Debug, Default)]
pub struct MockBackgroundExecution {
    next_id: AtomicU64,
    held: Mutex<Vec<u64>>,
    acquires: AtomicU32,
    renewals: AtomicU32,
    releases: AtomicU32,
    renew_failures: AtomicU32,
    fail_acquire: AtomicBool,
}

impl MockBackgroundExecution {
    /// Create a new capability.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` renewals.
    pub fn fail_next_renewals(&self, count: u32) {
        self.renew_failures.store(count, Ordering::Relaxed);
    }

    /// Make acquisitions fail.
    pub fn set_fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::Relaxed);
    }

    /// Number of extensions currently granted and not released.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of successful acquisitions.
    pub fn acquire_count(&self) -> u32 {
        self.acquires.load(Ordering::Relaxed)
    }

    /// Number of renewal attempts.
    pub fn renew_count(&self) -> u32 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// Number of releases.
    pub fn release_count(&self) -> u32 {
        self.releases.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackgroundExecution for MockBackgroundExecution {
    async fn acquire(&self) -> Result<ExtensionToken> {
        if self.fail_acquire.load(Ordering::Relaxed) {
            return Err(Error::unavailable("background execution refused"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        self.acquires.fetch_add(1, Ordering::Relaxed);
        Ok(ExtensionToken::new(id))
    }

    async fn renew(&self, token: &ExtensionToken) -> Result<()> {
        self.renewals.fetch_add(1, Ordering::Relaxed);
        let remaining = self.renew_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.renew_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(Error::unavailable(format!("{} expired", token)));
        }
        Ok(())
    }

    async fn release(&self, token: ExtensionToken) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| *id != token.id());
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}

// ==================== Persistence ====================

/// In-memory route persistence.
#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    routes: tokio::sync::RwLock<Vec<RouteSession>>,
    fail_updates: AtomicBool,
    fail_end: AtomicBool,
    updates: AtomicU32,
}

impl MemoryRouteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a route as-is, e.g. an active route left by a previous process.
    pub async fn insert(&self, route: RouteSession) {
        self.routes.write().await.push(route);
    }

    /// Look up a route.
    pub async fn get(&self, id: Uuid) -> Option<RouteSession> {
        self.routes.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Make incremental updates fail.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::Relaxed);
    }

    /// Make the terminal write fail.
    pub fn set_fail_end(&self, fail: bool) {
        self.fail_end.store(fail, Ordering::Relaxed);
    }

    /// Number of `update_route` calls, including failed ones.
    pub fn update_count(&self) -> u32 {
        self.updates.load(Ordering::Relaxed)
    }

    fn not_found(id: Uuid) -> Error {
        Error::persistence(format!("route {} not found", id))
    }
}

#[async_trait]
impl RoutePersistence for MemoryRouteStore {
    async fn start_route(&self, start_location: Option<Place>) -> Result<RouteSession> {
        let mut routes = self.routes.write().await;
        if let Some(active) = routes.iter().find(|r| r.is_active()) {
            return Err(Error::persistence(format!(
                "route {} is already active",
                active.id
            )));
        }
        let route = RouteSession::new(OffsetDateTime::now_utc(), start_location);
        routes.push(route.clone());
        Ok(route)
    }

    async fn update_route(&self, id: Uuid, mutator: RouteMutator) -> Result<RouteSession> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if self.fail_updates.load(Ordering::Relaxed) {
            return Err(Error::persistence("injected update failure"));
        }
        let mut routes = self.routes.write().await;
        let route = routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        mutator(route);
        Ok(route.clone())
    }

    async fn end_route(
        &self,
        id: Uuid,
        end_location: Option<Place>,
        waypoints: Vec<Waypoint>,
    ) -> Result<RouteSession> {
        if self.fail_end.load(Ordering::Relaxed) {
            return Err(Error::persistence("injected end failure"));
        }
        let mut routes = self.routes.write().await;
        let route = routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        if !route.complete(OffsetDateTime::now_utc(), end_location, waypoints) {
            return Err(Error::persistence(format!(
                "route {} is already {}",
                id, route.status
            )));
        }
        Ok(route.clone())
    }

    async fn current_active_route(&self) -> Result<Option<RouteSession>> {
        Ok(self
            .routes
            .read()
            .await
            .iter()
            .filter(|r| r.is_active())
            .max_by_key(|r| r.start_time)
            .cloned())
    }

    async fn delete_route(&self, id: Uuid) -> Result<()> {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|r| r.id != id);
        if routes.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn fetch_all_routes(&self) -> Result<Vec<RouteSession>> {
        let mut routes = self.routes.read().await.clone();
        routes.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(routes)
    }

    async fn fetch_recent_routes(&self, limit: usize) -> Result<Vec<RouteSession>> {
        let mut routes = self.fetch_all_routes().await?;
        routes.truncate(limit);
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Coordinate {
        Coordinate::new(31.2304, 121.4737).unwrap()
    }

    #[tokio::test]
    async fn test_one_shot_is_answered_only_when_configured() {
        let source = MockLocationSource::new(AuthorizationState::WhenInUse);
        let mut rx = source.subscribe();

        source.request_location().unwrap();
        assert!(rx.try_recv().is_err());

        source.set_one_shot_fix(Some(LocationReading::new(
            origin(),
            8.0,
            OffsetDateTime::now_utc(),
        )));
        source.request_location().unwrap();
        assert!(matches!(rx.try_recv(), Ok(LocationEvent::Fix(_))));
        assert_eq!(source.location_requests(), 2);
    }

    #[tokio::test]
    async fn test_when_in_use_prompt_never_grants_always() {
        let source = MockLocationSource::new(AuthorizationState::Undetermined);
        source.set_grant(AuthorizationState::Always);

        let state = source.request_authorization(PermissionLevel::WhenInUse).await;
        assert_eq!(state, AuthorizationState::WhenInUse);

        let state = source.request_authorization(PermissionLevel::Always).await;
        assert_eq!(state, AuthorizationState::Always);
        assert_eq!(source.permission_requests(), 2);
    }

    #[tokio::test]
    async fn test_geocoder_failure_and_counter() {
        let geocoder = MockGeocoder::with_place("Bund", "Shanghai");
        assert_eq!(geocoder.reverse_geocode(origin()).await.unwrap().len(), 1);

        geocoder.set_should_fail(true);
        assert!(matches!(
            geocoder.reverse_geocode(origin()).await,
            Err(Error::ResolutionUnavailable(_))
        ));
        assert_eq!(geocoder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_background_execution_tracks_held_tokens() {
        let background = MockBackgroundExecution::new();
        let token = background.acquire().await.unwrap();
        assert_eq!(background.held_count(), 1);

        background.fail_next_renewals(1);
        assert!(background.renew(&token).await.is_err());
        assert!(background.renew(&token).await.is_ok());

        background.release(token).await;
        assert_eq!(background.held_count(), 0);
        assert_eq!(background.renew_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryRouteStore::new();
        let route = store.start_route(None).await.unwrap();
        assert_eq!(
            store.current_active_route().await.unwrap().map(|r| r.id),
            Some(route.id)
        );
        assert!(store.start_route(None).await.is_err());

        let updated = store
            .update_route(route.id, Box::new(|r| r.note = Some("test".to_string())))
            .await
            .unwrap();
        assert_eq!(updated.note.as_deref(), Some("test"));

        let ended = store.end_route(route.id, None, Vec::new()).await.unwrap();
        assert!(!ended.is_active());
        assert!(store.current_active_route().await.unwrap().is_none());

        // Terminal routes cannot be ended twice.
        assert!(store.end_route(route.id, None, Vec::new()).await.is_err());

        store.delete_route(route.id).await.unwrap();
        assert!(store.fetch_all_routes().await.unwrap().is_empty());
        assert!(store.delete_route(route.id).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryRouteStore::new();
        let route = store.start_route(None).await.unwrap();
        store.set_fail_updates(true);
        assert!(store.update_route(route.id, Box::new(|_| {})).await.is_err());
        assert_eq!(store.update_count(), 1);

        store.set_fail_end(true);
        assert!(store.end_route(route.id, None, Vec::new()).await.is_err());
        assert!(store.get(route.id).await.unwrap().is_active());
    }
}
