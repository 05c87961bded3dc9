//! Example: Recording a Simulated Drive
//!
//! This example drives the session controller with mock capabilities: it
//! starts a drive, feeds a short trail of fixes heading north, and ends the
//! drive at the last fix.
//!
//! Run with: `cargo run --example simulated_drive`

use std::sync::Arc;
use std::time::Duration;

use drivelog_core::mock::{
    MemoryRouteStore, MockBackgroundExecution, MockGeocoder, MockLocationSource,
};
use drivelog_core::{
    Collaborators, Config, EndOutcome, RouteSessionController, SessionEvent, format_distance,
};
use drivelog_types::{AuthorizationState, Coordinate};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let source = Arc::new(MockLocationSource::new(AuthorizationState::WhenInUse));
    let collaborators = Collaborators {
        location: source.clone(),
        geocoder: Arc::new(MockGeocoder::with_place("Pike Street", "Seattle")),
        background: Arc::new(MockBackgroundExecution::new()),
        persistence: Arc::new(MemoryRouteStore::new()),
    };
    let controller = RouteSessionController::initialize(collaborators, Config::default()).await?;

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::WaypointAdded {
                waypoint, total, ..
            } = event
            {
                println!(
                    "  #{} {:.5}, {:.5} {}",
                    total, waypoint.latitude, waypoint.longitude, waypoint.address
                );
            }
        }
    });

    let origin = Coordinate::new(47.6097, -122.3331)?;
    source.emit_at(origin, 5.0);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let Some(route) = controller.start(None).await? else {
        println!("A drive is already in progress");
        return Ok(());
    };
    println!("Started drive {}", route.id);

    // Move north in 25 m steps.
    let mut here = origin;
    for _ in 0..8 {
        here = here.offset_north(25.0);
        source.emit_at(here, 5.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    match controller.end(None).await? {
        EndOutcome::Completed(route) => {
            println!();
            println!("Drive completed:");
            println!(
                "  From:     {}",
                route.start_location.map(|p| p.label).unwrap_or_default()
            );
            println!(
                "  To:       {}",
                route.end_location.map(|p| p.label).unwrap_or_default()
            );
            println!(
                "  Distance: {}",
                format_distance(route.distance.unwrap_or_default())
            );
            println!("  Points:   {}", route.waypoints.len());
        }
        EndOutcome::ManualInputRequired => println!("No end location available"),
        EndOutcome::NotActive => println!("No drive was active"),
    }

    Ok(())
}
