//! Route commands - browse the local journal.

use std::path::PathBuf;

use anyhow::{Result, bail};
use uuid::Uuid;

use drivelog_store::RouteStore;

use crate::cli::{OutputFormat, RouteFilterArgs};
use crate::format::{
    FormatOptions, format_route_csv, format_route_json, format_route_text, format_stats_csv,
    format_stats_json, format_stats_text, format_summaries_csv, format_summaries_json,
    format_summaries_text,
};
use crate::util::{build_query, write_output};

/// Execute the routes command.
pub fn cmd_routes(
    store: &RouteStore,
    filter: &RouteFilterArgs,
    oldest_first: bool,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let mut query = build_query(filter)?;
    if oldest_first {
        query = query.oldest_first();
    }
    let summaries = store.list_summaries(&query)?;

    let content = match format {
        OutputFormat::Text => format_summaries_text(&summaries, opts),
        OutputFormat::Json => format_summaries_json(&summaries)?,
        OutputFormat::Csv => format_summaries_csv(&summaries),
    };
    write_output(output, &content)
}

/// Execute the show command.
pub fn cmd_show(
    store: &RouteStore,
    id: Uuid,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let Some(route) = store.get_route(id)? else {
        bail!("No drive with id {}", id);
    };

    let content = match format {
        OutputFormat::Text => format_route_text(&route, opts),
        OutputFormat::Json => format_route_json(&route)?,
        OutputFormat::Csv => format_route_csv(&route),
    };
    write_output(output, &content)
}

/// Execute the delete command.
pub fn cmd_delete(store: &RouteStore, id: Uuid, quiet: bool) -> Result<()> {
    let Some(route) = store.get_route(id)? else {
        bail!("No drive with id {}", id);
    };
    if route.is_active() {
        bail!(
            "Drive {} is still active. End or cancel it first.",
            route.id
        );
    }

    store.remove_route(id)?;
    if !quiet {
        println!("Deleted drive {}", id);
    }
    Ok(())
}

/// Execute the stats command.
pub fn cmd_stats(
    store: &RouteStore,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let stats = store.stats()?;
    let content = match format {
        OutputFormat::Text => format_stats_text(&stats, opts),
        OutputFormat::Json => format_stats_json(&stats)?,
        OutputFormat::Csv => format_stats_csv(&stats),
    };
    write_output(output, &content)
}
