//! Drive commands - record a drive from a track file, and finish drives left
//! active by an interrupted recording.
//!
//! The engine runs against a scripted location source: `replay` feeds it the
//! track's fixes at the requested speed, so waypoints go through the same
//! filtering, labelling and incremental persistence as a live drive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use drivelog_core::mock::{MockBackgroundExecution, MockLocationSource};
use drivelog_core::{
    Collaborators, EndOutcome, EventReceiver, Geocoder, OfflineGeocoder, RouteSessionController,
    SessionEvent, format_distance, format_elapsed,
};
use drivelog_store::RouteStore;
use drivelog_types::{AuthorizationState, Coordinate, LocationReading, Place, RouteSession};

use crate::config::Config;

/// Arguments for the replay command.
#[derive(Debug, Clone)]
pub struct ReplayArgs {
    pub track: PathBuf,
    pub speed: f64,
    pub from: Option<String>,
    pub to: Option<String>,
    pub note: Option<String>,
}

/// A recorded GPS track.
///
/// ```json
/// {
///   "points": [
///     { "latitude": 52.52, "longitude": 13.405, "accuracy": 8.0, "offset": 0 },
///     { "latitude": 52.521, "longitude": 13.407, "offset": 12.5 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub points: Vec<TrackPoint>,
}

/// One fix of a track.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    /// Seconds since the first point.
    pub offset: f64,
}

fn default_accuracy() -> f64 {
    5.0
}

impl TrackPoint {
    fn coordinate(&self) -> Result<Coordinate> {
        Ok(Coordinate::new(self.latitude, self.longitude)?)
    }

    fn reading_now(&self) -> Result<LocationReading> {
        Ok(LocationReading::new(
            self.coordinate()?,
            self.accuracy,
            OffsetDateTime::now_utc(),
        ))
    }
}

impl Track {
    /// Load and check a track file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read track: {}", path.display()))?;
        let track: Track = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse track: {}", path.display()))?;
        track.check()?;
        Ok(track)
    }

    fn check(&self) -> Result<()> {
        if self.points.is_empty() {
            bail!("Track has no points");
        }
        let mut previous = 0.0;
        for (i, point) in self.points.iter().enumerate() {
            point
                .coordinate()
                .with_context(|| format!("Track point {} is not a valid coordinate", i))?;
            if !point.offset.is_finite() || point.offset < previous {
                bail!(
                    "Track point {} has offset {} before the previous point",
                    i,
                    point.offset
                );
            }
            previous = point.offset;
        }
        Ok(())
    }

    /// Wall-clock pause before each point at the given speed.
    fn delays(&self, speed: f64) -> Result<Vec<Duration>> {
        let mut previous = self.points.first().map(|p| p.offset).unwrap_or_default();
        self.points
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let gap = (point.offset - previous).max(0.0) / speed;
                previous = point.offset;
                Duration::try_from_secs_f64(gap).with_context(|| {
                    format!("Track point {} is too far apart to replay at speed {}", i, speed)
                })
            })
            .collect()
    }
}

/// Engine wired to a scripted location source and the route database.
struct Engine {
    controller: RouteSessionController,
    source: Arc<MockLocationSource>,
}

impl Engine {
    /// Build the engine and re-adopt any drive left active in the database.
    async fn start(config: &Config, store: Arc<RouteStore>) -> Result<Self> {
        let source = Arc::new(MockLocationSource::new(AuthorizationState::Always));
        let collaborators = Collaborators {
            location: source.clone(),
            geocoder: geocoder(config)?,
            background: Arc::new(MockBackgroundExecution::new()),
            persistence: store,
        };
        let controller = RouteSessionController::initialize(collaborators, config.engine.clone())
            .await
            .context("Failed to start the drive engine")?;
        Ok(Self { controller, source })
    }

    fn active_route(&self) -> Option<RouteSession> {
        let state = self.controller.state();
        if state.is_driving {
            state.current_route
        } else {
            None
        }
    }
}

/// Pick the geocoder backend from the config.
fn geocoder(config: &Config) -> Result<Arc<dyn Geocoder>> {
    match config.geocoder_url.as_deref() {
        #[cfg(feature = "http-geocoder")]
        Some(url) => {
            let geocoder = drivelog_core::NominatimGeocoder::new(url)
                .with_context(|| format!("Invalid geocoder URL: {}", url))?;
            Ok(Arc::new(geocoder))
        }
        #[cfg(not(feature = "http-geocoder"))]
        Some(url) => {
            warn!(
                "geocoder_url {} ignored: built without the http-geocoder feature",
                url
            );
            Ok(Arc::new(OfflineGeocoder))
        }
        None => Ok(Arc::new(OfflineGeocoder)),
    }
}

/// Log engine events while a drive is recorded.
fn spawn_event_logger(mut events: EventReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    debug!("Event logger lagged, {} events dropped", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                SessionEvent::WaypointAdded {
                    waypoint,
                    total,
                    forced,
                    ..
                } => debug!(
                    "Waypoint {} at {} {}",
                    total,
                    waypoint.address,
                    if forced { "(timer)" } else { "" }
                ),
                SessionEvent::PersistenceFailed { error, .. } => {
                    warn!("Failed to save waypoints: {}", error)
                }
                SessionEvent::BackgroundExtensionLost { error } => {
                    warn!("Background extension lost: {}", error)
                }
                other => debug!("{:?}", other),
            }
        }
    })
}

fn summary_line(route: &RouteSession) -> String {
    format!(
        "{} {} in {}, {} waypoints ({})",
        route.status,
        format_distance(route.distance.unwrap_or_else(|| route.total_distance())),
        format_elapsed(Duration::from_secs_f64(
            route.duration.unwrap_or_default().max(0.0)
        )),
        route.waypoints.len(),
        route.id
    )
}

fn already_active(route: &RouteSession) -> anyhow::Error {
    anyhow::anyhow!(
        "A drive started at {} is still active ({}).\n\
         Finish it with 'drivelog end --at <PLACE>' or 'drivelog cancel'.",
        route.start_time,
        route.id
    )
}

/// Execute the replay command.
pub async fn cmd_replay(
    args: ReplayArgs,
    config: &Config,
    store: Arc<RouteStore>,
    quiet: bool,
) -> Result<()> {
    let track = Track::load(&args.track)?;
    let delays = track.delays(args.speed)?;
    let engine = Engine::start(config, store).await?;
    if let Some(route) = engine.active_route() {
        return Err(already_active(&route));
    }

    let controller = &engine.controller;
    let logger = spawn_event_logger(controller.subscribe_events());

    // The first fix stands in for the location the user had when pressing start.
    let first = track.points[0].reading_now()?;
    controller.provider().prime(first);

    let route = controller
        .start(args.from.map(Place::manual))
        .await
        .context("Failed to start drive")?
        .context("A drive is already in progress")?;
    info!("Recording drive {}", route.id);
    if let Some(note) = args.note {
        controller.set_note(note).await?;
    }

    let playback = play(&engine.source, &track, &delays);
    tokio::select! {
        result = playback => result?,
        _ = tokio::signal::ctrl_c() => {
            let cancelled = controller.cancel().await?;
            logger.abort();
            if let Some(route) = cancelled {
                eprintln!("Interrupted: drive {} cancelled", route.id);
            }
            return Ok(());
        }
    }

    // Let the accumulator drain the last fixes before ending.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let last = track.points[track.points.len() - 1].reading_now()?;
    engine.source.set_one_shot_fix(Some(last));

    let outcome = controller.end(args.to.map(Place::manual)).await;
    logger.abort();
    match outcome.context("Failed to end drive")? {
        EndOutcome::Completed(route) => {
            if !quiet {
                println!("Recorded {}", summary_line(&route));
            }
            Ok(())
        }
        EndOutcome::ManualInputRequired => bail!(
            "Could not determine where the drive ended.\n\
             Finish it with 'drivelog end --at <PLACE>'."
        ),
        EndOutcome::NotActive => bail!("The drive is no longer active"),
    }
}

/// Feed the track to the location source.
async fn play(source: &MockLocationSource, track: &Track, delays: &[Duration]) -> Result<()> {
    let total = track.points.len();
    for (i, (point, &delay)) in track.points.iter().zip(delays).enumerate() {
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        source.emit_fix(point.reading_now()?);
        debug!("Replayed point {}/{}", i + 1, total);
    }
    Ok(())
}

/// Execute the end command.
pub async fn cmd_end(
    at: String,
    config: &Config,
    store: Arc<RouteStore>,
    quiet: bool,
) -> Result<()> {
    let engine = Engine::start(config, store).await?;
    if engine.active_route().is_none() {
        bail!("No active drive");
    }

    match engine.controller.end(Some(Place::manual(at))).await? {
        EndOutcome::Completed(route) => {
            if !quiet {
                println!("Ended {}", summary_line(&route));
            }
            Ok(())
        }
        EndOutcome::ManualInputRequired | EndOutcome::NotActive => {
            bail!("The drive could not be ended")
        }
    }
}

/// Execute the cancel command.
pub async fn cmd_cancel(config: &Config, store: Arc<RouteStore>, quiet: bool) -> Result<()> {
    let engine = Engine::start(config, store).await?;
    match engine.controller.cancel().await? {
        Some(route) => {
            if !quiet {
                println!("Cancelled drive {}", route.id);
            }
            Ok(())
        }
        None => bail!("No active drive"),
    }
}
