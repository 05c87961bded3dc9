//! End-to-end drive scenarios for drivelog-core.
//!
//! These run the full controller against the in-memory mocks, with tokio's
//! clock paused so timeouts and periodic tasks complete instantly:
//! `cargo test --package drivelog-core --test session_scenarios`

use std::sync::Arc;
use std::time::Duration;

use drivelog_core::mock::{
    MemoryRouteStore, MockBackgroundExecution, MockGeocoder, MockLocationSource,
};
use drivelog_core::{
    AddressResolver, CaptureOutcome, Collaborators, Config, EndOutcome, Error, EventDispatcher,
    LocationProvider, RoutePersistence, RouteSessionController, SessionEvent, SessionPhase,
    TrackingConfig, WaypointAccumulator,
};
use drivelog_types::{
    AuthorizationState, Coordinate, LocationReading, Place, RouteSession, RouteStatus, Waypoint,
};
use proptest::prelude::*;
use time::OffsetDateTime;

struct Scenario {
    source: Arc<MockLocationSource>,
    geocoder: Arc<MockGeocoder>,
    background: Arc<MockBackgroundExecution>,
    store: Arc<MemoryRouteStore>,
}

impl Scenario {
    fn new(authorization: AuthorizationState) -> Self {
        Self {
            source: Arc::new(MockLocationSource::new(authorization)),
            geocoder: Arc::new(MockGeocoder::with_place("Ferry Building", "San Francisco")),
            background: Arc::new(MockBackgroundExecution::new()),
            store: Arc::new(MemoryRouteStore::new()),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            location: self.source.clone(),
            geocoder: self.geocoder.clone(),
            background: self.background.clone(),
            persistence: self.store.clone(),
        }
    }

    fn controller(&self) -> RouteSessionController {
        RouteSessionController::new(self.collaborators(), Config::default()).unwrap()
    }
}

fn origin() -> Coordinate {
    Coordinate::new(37.7955, -122.3937).unwrap()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut drivelog_core::EventReceiver) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_denied_start_creates_no_session() {
    let scenario = Scenario::new(AuthorizationState::Denied);
    let controller = scenario.controller();

    let result = controller.start(None).await;
    assert!(matches!(
        result,
        Err(Error::PermissionDenied(AuthorizationState::Denied))
    ));
    assert!(!controller.state().is_driving);
    assert!(controller.state().current_route.is_none());
    assert!(scenario.store.fetch_all_routes().await.unwrap().is_empty());
    assert!(!scenario.source.is_updating());
}

#[tokio::test]
async fn test_undetermined_start_asks_first() {
    let scenario = Scenario::new(AuthorizationState::Undetermined);
    let controller = scenario.controller();

    let route = controller.start(None).await.unwrap();
    assert!(route.is_some());
    assert!(scenario.source.permission_requests() >= 1);
    assert!(controller.state().is_driving);
}

#[tokio::test]
async fn test_cached_reading_labels_start_without_hardware_request() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();

    let ten_seconds_ago = OffsetDateTime::now_utc() - time::Duration::seconds(10);
    controller
        .provider()
        .prime(LocationReading::new(origin(), 10.0, ten_seconds_ago));

    let route = controller.start(None).await.unwrap().unwrap();
    let start = route.start_location.unwrap();
    assert_eq!(start.label, "Ferry Building, San Francisco");
    assert_eq!(start.coordinate, Some(origin()));
    assert_eq!(scenario.source.location_requests(), 0);
}

#[tokio::test]
async fn test_stale_cached_reading_leaves_start_empty() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();

    let an_hour_ago = OffsetDateTime::now_utc() - time::Duration::hours(1);
    controller
        .provider()
        .prime(LocationReading::new(origin(), 10.0, an_hour_ago));

    let route = controller.start(None).await.unwrap().unwrap();
    assert!(route.start_location.is_none());
    assert_eq!(scenario.source.location_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_with_retries_exhausted_requires_manual_input_once() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();
    let mut events = controller.subscribe_events();

    controller.start(None).await.unwrap();
    let outcome = controller
        .end_with_retries(3, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(outcome, EndOutcome::ManualInputRequired);
    assert_eq!(controller.phase().await, SessionPhase::Active);
    assert!(controller.state().is_driving);
    assert_eq!(scenario.source.location_requests(), 3);

    let manual: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::ManualInputRequired { .. }))
        .collect();
    assert_eq!(manual.len(), 1);
    assert!(matches!(
        manual[0],
        SessionEvent::ManualInputRequired { attempts: 3, .. }
    ));

    // A manually entered place still ends the drive.
    let outcome = controller
        .end(Some(Place::manual("Office")))
        .await
        .unwrap();
    assert!(matches!(outcome, EndOutcome::Completed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_end_falls_back_to_one_shot_fix() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();
    controller.start(None).await.unwrap();

    let destination = origin().offset_north(2_000.0);
    scenario.source.set_one_shot_fix(Some(LocationReading::new(
        destination,
        12.0,
        OffsetDateTime::now_utc(),
    )));

    let EndOutcome::Completed(route) = controller.end(None).await.unwrap() else {
        panic!("expected the drive to complete");
    };
    let end = route.end_location.unwrap();
    assert_eq!(end.coordinate, Some(destination));
    assert_eq!(route.status, RouteStatus::Completed);
    assert!(route.end_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_tracked_drive_persists_trail() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();
    let route = controller.start(None).await.unwrap().unwrap();
    settle().await;

    for meters in [0.0, 3.0, 6.0, 12.0] {
        scenario.source.emit_at(origin().offset_north(meters), 8.0);
        settle().await;
    }
    assert_eq!(controller.current_waypoints().await.len(), 3);

    let EndOutcome::Completed(done) = controller
        .end(Some(Place::manual("Home")))
        .await
        .unwrap()
    else {
        panic!("expected the drive to complete");
    };
    assert_eq!(done.id, route.id);
    assert_eq!(done.waypoints.len(), 3);
    assert!((done.distance.unwrap() - 12.0).abs() < 0.5);
    // Back-filled from the first waypoint.
    assert!(done.start_location.is_some());
}

#[tokio::test]
async fn test_cancel_is_noop_unless_active() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();

    assert!(controller.cancel().await.unwrap().is_none());
    assert_eq!(controller.phase().await, SessionPhase::Idle);

    controller.start(None).await.unwrap();
    let cancelled = controller.cancel().await.unwrap().unwrap();
    assert_eq!(cancelled.status, RouteStatus::Cancelled);
    assert!(cancelled.end_location.is_none());

    assert!(controller.cancel().await.unwrap().is_none());
    assert_eq!(controller.phase().await, SessionPhase::Cancelled);
}

#[tokio::test]
async fn test_restart_recovers_active_route() {
    let scenario = Scenario::new(AuthorizationState::Always);

    let started = OffsetDateTime::now_utc() - time::Duration::minutes(15);
    let mut route = RouteSession::new(started, Some(Place::manual("Depot")));
    route.waypoints = (0..4)
        .map(|i| Waypoint {
            latitude: origin().latitude + f64::from(i) * 0.001,
            longitude: origin().longitude,
            address: format!("Leg {}", i),
            timestamp: started + time::Duration::minutes(i64::from(i)),
        })
        .collect();
    scenario.store.insert(route.clone()).await;

    let controller = RouteSessionController::initialize(scenario.collaborators(), Config::default())
        .await
        .unwrap();

    let state = controller.state();
    assert!(state.is_driving);
    assert_eq!(state.waypoint_count, 4);
    assert_eq!(state.current_route.unwrap().id, route.id);
    assert_eq!(controller.current_waypoints().await, route.waypoints);
    assert_eq!(scenario.background.held_count(), 1);
    assert!(scenario.source.is_updating());

    // A second recovery while driving changes nothing.
    assert!(controller.recover_active_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_start_adopts_active_route_left_in_storage() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let left_over = RouteSession::new(
        OffsetDateTime::now_utc() - time::Duration::minutes(30),
        Some(Place::manual("Garage")),
    );
    scenario.store.insert(left_over.clone()).await;

    // Built without initialize(), so nothing was recovered yet.
    let controller = scenario.controller();
    let mut events = controller.subscribe_events();
    assert!(controller.start(None).await.unwrap().is_none());

    let routes = scenario.store.fetch_all_routes().await.unwrap();
    assert_eq!(routes.iter().filter(|r| r.is_active()).count(), 1);
    assert_eq!(
        scenario.store.current_active_route().await.unwrap().unwrap().id,
        left_over.id
    );
    assert_eq!(controller.state().current_route.unwrap().id, left_over.id);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::Recovered { route_id, .. } if *route_id == left_over.id
    )));

    // The adopted drive ends like any other.
    let outcome = controller.end(Some(Place::manual("Home"))).await.unwrap();
    let EndOutcome::Completed(route) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(route.id, left_over.id);
}

#[tokio::test(start_paused = true)]
async fn test_queries_answer_while_end_waits_for_a_fix() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = Arc::new(scenario.controller());
    let route = controller.start(None).await.unwrap().unwrap();

    let ending = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.end_with_retries(3, Duration::from_secs(5)).await }
    });
    settle().await;

    let quick = Duration::from_millis(10);
    let phase = tokio::time::timeout(quick, controller.phase()).await.unwrap();
    assert_eq!(phase, SessionPhase::Ending);
    assert!(tokio::time::timeout(quick, controller.current_waypoints()).await.is_ok());
    let snapshot = tokio::time::timeout(quick, controller.debug_snapshot())
        .await
        .unwrap();
    assert_eq!(snapshot.route_id, Some(route.id));
    assert!(tokio::time::timeout(quick, controller.delete_route(route.id))
        .await
        .unwrap()
        .is_err());

    assert_eq!(
        ending.await.unwrap().unwrap(),
        EndOutcome::ManualInputRequired
    );
}

#[tokio::test]
async fn test_new_rejects_zero_periods() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let mut config = Config::default();
    config.session.elapsed_refresh_ms = 0;
    let result = RouteSessionController::new(scenario.collaborators(), config);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));

    let mut config = Config::default();
    config.tracking.forced_capture_interval = 0;
    let result = RouteSessionController::new(scenario.collaborators(), config);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_initialize_rejects_invalid_config() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let mut config = Config::default();
    config.tracking.flush_every = 0;

    let result = RouteSessionController::initialize(scenario.collaborators(), config).await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_guard_held_exactly_while_active() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();
    assert_eq!(scenario.background.held_count(), 0);

    controller.start(None).await.unwrap();
    assert_eq!(scenario.background.held_count(), 1);
    controller.start(None).await.unwrap();
    assert_eq!(scenario.background.acquire_count(), 1);

    controller.end(Some(Place::manual("A"))).await.unwrap();
    assert_eq!(scenario.background.held_count(), 0);

    controller.start(None).await.unwrap();
    assert_eq!(scenario.background.held_count(), 1);
    controller.cancel().await.unwrap();
    assert_eq!(scenario.background.held_count(), 0);
    assert_eq!(
        scenario.background.acquire_count(),
        scenario.background.release_count()
    );
}

#[tokio::test]
async fn test_background_failure_does_not_block_start() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    scenario.background.set_fail_acquire(true);
    let controller = scenario.controller();

    assert!(controller.start(None).await.unwrap().is_some());
    assert!(controller.state().is_driving);
}

#[tokio::test]
async fn test_authorization_changes_are_forwarded() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();
    let mut events = controller.subscribe_events();

    scenario.source.set_authorization(AuthorizationState::Denied);
    settle().await;

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::AuthorizationChanged {
            state: AuthorizationState::Denied
        }
    )));
}

#[tokio::test]
async fn test_recent_routes_newest_first() {
    let scenario = Scenario::new(AuthorizationState::WhenInUse);
    let controller = scenario.controller();

    let mut ids = Vec::new();
    for label in ["one", "two", "three"] {
        let route = controller.start(None).await.unwrap().unwrap();
        controller.end(Some(Place::manual(label))).await.unwrap();
        ids.push(route.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let recent = controller.recent_routes(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, ids[2]);
    assert_eq!(recent[1].id, ids[1]);
}

/// Replay `steps` into an accumulator. Each step is (meters north, seconds
/// offset, forced).
fn replay(steps: Vec<(f64, i64, bool)>) -> (Vec<Waypoint>, Vec<Waypoint>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let source = Arc::new(MockLocationSource::new(AuthorizationState::WhenInUse));
        let config = Config::default();
        let provider = Arc::new(LocationProvider::new(source, config.location.clone()));
        let resolver = Arc::new(AddressResolver::new(
            Arc::new(MockGeocoder::with_place("Somewhere", "Town")),
            config.address.clone(),
        ));
        let store = Arc::new(MemoryRouteStore::new());
        let route = store.start_route(None).await.unwrap();
        let accumulator = WaypointAccumulator::new(
            route.id,
            TrackingConfig::default(),
            provider.clone(),
            resolver,
            store,
            EventDispatcher::default(),
        );

        let base = OffsetDateTime::now_utc();
        let mut continuous = Vec::new();
        for (meters, offset, forced) in steps {
            let reading = LocationReading::new(
                origin().offset_north(meters),
                10.0,
                base + time::Duration::seconds(offset),
            );
            if forced {
                provider.prime(reading);
                accumulator.handle_forced().await;
            } else if let CaptureOutcome::Accepted(waypoint) =
                accumulator.handle_continuous(reading).await
            {
                continuous.push(waypoint);
            }
        }
        (accumulator.waypoints().await, continuous)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn waypoint_timestamps_never_decrease(
        steps in proptest::collection::vec((0.0f64..500.0, -120i64..120, any::<bool>()), 1..40)
    ) {
        let (waypoints, _) = replay(steps);
        for pair in waypoints.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn continuous_points_respect_distance_filter(
        steps in proptest::collection::vec((0.0f64..200.0, 0i64..600), 1..40)
    ) {
        let mut steps: Vec<_> = steps.into_iter().map(|(m, s)| (m, s, false)).collect();
        steps.sort_by_key(|step| step.1);
        let (waypoints, continuous) = replay(steps);
        prop_assert_eq!(waypoints.len(), continuous.len());
        for pair in continuous.windows(2) {
            prop_assert!(pair[0].distance_to(&pair[1]) >= 5.0);
        }
    }
}
