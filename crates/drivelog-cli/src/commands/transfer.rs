//! Export and import commands.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use drivelog_store::RouteStore;

use crate::cli::{ExportFormat, RouteFilterArgs};
use crate::util::build_query;

fn writer(output: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create file: {}", path.display())
        })?)),
        None => Box::new(io::stdout().lock()),
    })
}

/// Execute the export command.
pub fn cmd_export(
    store: &RouteStore,
    format: ExportFormat,
    id: Option<Uuid>,
    filter: &RouteFilterArgs,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    let count = match format {
        ExportFormat::Json => {
            let mut out = writer(output)?;
            let count = match id {
                Some(id) => {
                    let Some(route) = store.get_route(id)? else {
                        bail!("No drive with id {}", id);
                    };
                    serde_json::to_writer_pretty(&mut out, &drivelog_store::ExportDocument {
                        version: drivelog_store::EXPORT_VERSION,
                        exported_at: time::OffsetDateTime::now_utc(),
                        routes: vec![route],
                    })?;
                    1
                }
                None => store.export_json(&build_query(filter)?, &mut out)?,
            };
            writeln!(out)?;
            out.flush()?;
            count
        }
        ExportFormat::Csv => {
            let Some(id) = id else {
                bail!("CSV export needs a drive: use --id <ID>");
            };
            let mut out = writer(output)?;
            let count = store.export_waypoints_csv(id, &mut out)?;
            out.flush()?;
            count
        }
    };

    if let Some(path) = output
        && !quiet
    {
        let what = match format {
            ExportFormat::Json => "drives",
            ExportFormat::Csv => "waypoints",
        };
        eprintln!("Exported {} {} to {}", count, what, path.display());
    }
    Ok(())
}

/// Execute the import command.
pub fn cmd_import(store: &RouteStore, input: Option<PathBuf>, quiet: bool) -> Result<()> {
    let result = match input {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            store.import_json(BufReader::new(file))?
        }
        None => store
            .import_json(io::stdin().lock())
            .context("Failed to import from stdin")?,
    };

    if !quiet {
        println!("Import complete:");
        println!("  Imported: {}", result.imported);
        println!("  Skipped (already stored): {}", result.skipped);
        if result.conflicts > 0 {
            println!(
                "  Skipped (another drive is active): {}",
                result.conflicts
            );
        }
    }
    Ok(())
}
