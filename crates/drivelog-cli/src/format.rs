//! Output formatting for text, JSON, and CSV output.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use drivelog_core::{format_distance, format_elapsed};
use drivelog_store::{RouteStats, RouteSummary};
use drivelog_types::{Place, RouteSession, RouteStatus};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }
}

/// Escape a value for CSV output
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Format a route status with color
#[must_use]
pub fn format_status(status: RouteStatus, no_color: bool) -> String {
    let label = status.as_str();
    if no_color {
        return label.to_string();
    }
    match status {
        RouteStatus::Active => format!("{}", label.yellow().bold()),
        RouteStatus::Completed => format!("{}", label.green()),
        RouteStatus::Cancelled => format!("{}", label.red()),
    }
}

fn timestamp(time: OffsetDateTime) -> String {
    time.format(&Rfc3339).unwrap_or_else(|_| time.to_string())
}

/// Compact local-style timestamp for tables
fn short_timestamp(time: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        time.year(),
        u8::from(time.month()),
        time.day(),
        time.hour(),
        time.minute()
    )
}

fn label(place: Option<&str>) -> &str {
    place.unwrap_or("-")
}

fn duration(seconds: Option<f64>) -> String {
    seconds
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| format_elapsed(std::time::Duration::from_secs_f64(s)))
        .unwrap_or_else(|| "-".to_string())
}

fn distance(meters: Option<f64>) -> String {
    meters.map(format_distance).unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// Route lists
// ============================================================================

#[must_use]
pub fn format_summaries_text(summaries: &[RouteSummary], opts: &FormatOptions) -> String {
    if summaries.is_empty() {
        return "No drives recorded.\n".to_string();
    }

    let mut builder = Builder::default();
    builder.push_record([
        "Started", "Status", "From", "To", "Distance", "Duration", "Points", "Id",
    ]);
    for summary in summaries {
        builder.push_record([
            short_timestamp(summary.start_time),
            format_status(summary.status, opts.no_color),
            label(summary.start_label.as_deref()).to_string(),
            label(summary.end_label.as_deref()).to_string(),
            distance(summary.distance),
            duration(summary.duration),
            summary.waypoint_count.to_string(),
            summary.id.to_string(),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());

    let count = if opts.no_color {
        summaries.len().to_string()
    } else {
        format!("{}", summaries.len().to_string().bold())
    };
    format!("{} drive(s)\n{}\n", count, table)
}

pub fn format_summaries_json(summaries: &[RouteSummary]) -> Result<String> {
    #[derive(Serialize)]
    struct RouteList<'a> {
        count: usize,
        routes: &'a [RouteSummary],
    }

    let json = serde_json::to_string_pretty(&RouteList {
        count: summaries.len(),
        routes: summaries,
    })?;
    Ok(format!("{}\n", json))
}

#[must_use]
pub fn format_summaries_csv(summaries: &[RouteSummary]) -> String {
    let mut output =
        String::from("id,start_time,end_time,status,from,to,distance_m,duration_s,waypoints\n");
    for summary in summaries {
        output.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            summary.id,
            timestamp(summary.start_time),
            summary.end_time.map(timestamp).unwrap_or_default(),
            summary.status,
            csv_escape(summary.start_label.as_deref().unwrap_or_default()),
            csv_escape(summary.end_label.as_deref().unwrap_or_default()),
            summary.distance.map(|d| format!("{:.1}", d)).unwrap_or_default(),
            summary.duration.map(|d| format!("{:.0}", d)).unwrap_or_default(),
            summary.waypoint_count,
        ));
    }
    output
}

// ============================================================================
// Route detail
// ============================================================================

fn place_text(place: Option<&Place>) -> String {
    match place {
        Some(Place {
            label,
            coordinate: Some(c),
        }) => format!("{} ({:.5}, {:.5})", label, c.latitude, c.longitude),
        Some(Place { label, .. }) => label.clone(),
        None => "-".to_string(),
    }
}

#[must_use]
pub fn format_route_text(route: &RouteSession, opts: &FormatOptions) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Property", "Value"]);
    builder.push_record(["Id".to_string(), route.id.to_string()]);
    builder.push_record([
        "Status".to_string(),
        format_status(route.status, opts.no_color),
    ]);
    builder.push_record(["Started".to_string(), timestamp(route.start_time)]);
    builder.push_record([
        "Ended".to_string(),
        route.end_time.map(timestamp).unwrap_or_else(|| "-".to_string()),
    ]);
    builder.push_record(["From".to_string(), place_text(route.start_location.as_ref())]);
    builder.push_record(["To".to_string(), place_text(route.end_location.as_ref())]);
    builder.push_record([
        "Distance".to_string(),
        distance(route.distance.or_else(|| Some(route.total_distance()))),
    ]);
    builder.push_record(["Duration".to_string(), duration(route.duration)]);
    if let Some(note) = &route.note {
        builder.push_record(["Note".to_string(), note.clone()]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());

    let title = if opts.no_color {
        "Drive".to_string()
    } else {
        format!("{}", "Drive".bold())
    };
    let mut output = format!("{}\n{}\n", title, table);

    if route.waypoints.is_empty() {
        output.push_str("\nNo waypoints recorded.\n");
        return output;
    }

    let mut points = Builder::default();
    points.push_record(["#", "Time", "Latitude", "Longitude", "Address"]);
    for (i, waypoint) in route.waypoints.iter().enumerate() {
        points.push_record([
            i.to_string(),
            short_timestamp(waypoint.timestamp),
            format!("{:.6}", waypoint.latitude),
            format!("{:.6}", waypoint.longitude),
            waypoint.address.clone(),
        ]);
    }
    let mut points = points.build();
    points.with(Style::rounded());
    output.push_str(&format!(
        "\nWaypoints ({}):\n{}\n",
        route.waypoints.len(),
        points
    ));
    output
}

pub fn format_route_json(route: &RouteSession) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(route)?))
}

#[must_use]
pub fn format_route_csv(route: &RouteSession) -> String {
    let mut output = String::from("seq,timestamp,latitude,longitude,address\n");
    for (seq, waypoint) in route.waypoints.iter().enumerate() {
        output.push_str(&format!(
            "{},{},{},{},{}\n",
            seq,
            timestamp(waypoint.timestamp),
            waypoint.latitude,
            waypoint.longitude,
            csv_escape(&waypoint.address)
        ));
    }
    output
}

// ============================================================================
// Statistics
// ============================================================================

#[must_use]
pub fn format_stats_text(stats: &RouteStats, opts: &FormatOptions) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Statistic", "Value"]);
    builder.push_record(["Drives".to_string(), stats.total_routes.to_string()]);
    builder.push_record(["Completed".to_string(), stats.completed.to_string()]);
    builder.push_record(["Cancelled".to_string(), stats.cancelled.to_string()]);
    builder.push_record(["Active".to_string(), stats.active.to_string()]);
    builder.push_record([
        "Total distance".to_string(),
        format_distance(stats.total_distance),
    ]);
    builder.push_record([
        "Total time".to_string(),
        duration(Some(stats.total_duration)),
    ]);
    builder.push_record(["Longest drive".to_string(), distance(stats.longest_distance)]);

    let mut table = builder.build();
    table.with(Style::rounded());

    let title = if opts.no_color {
        "Journal statistics".to_string()
    } else {
        format!("{}", "Journal statistics".bold())
    };
    format!("{}\n{}\n", title, table)
}

pub fn format_stats_json(stats: &RouteStats) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(stats)?))
}

#[must_use]
pub fn format_stats_csv(stats: &RouteStats) -> String {
    format!(
        "total_routes,completed,cancelled,active,total_distance_m,total_duration_s,longest_distance_m\n\
         {},{},{},{},{:.1},{:.0},{}\n",
        stats.total_routes,
        stats.completed,
        stats.cancelled,
        stats.active,
        stats.total_distance,
        stats.total_duration,
        stats
            .longest_distance
            .map(|d| format!("{:.1}", d))
            .unwrap_or_default()
    )
}
