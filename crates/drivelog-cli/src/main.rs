use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands};
use commands::*;
use config::{Config, resolve_database};
use format::FormatOptions;
use util::open_store;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "drivelog", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let opts = FormatOptions::new(cli.no_color || config.no_color);
    let output = cli.output.as_ref();
    let database = resolve_database(cli.database.clone(), &config);

    match cli.command {
        Commands::Replay {
            track,
            speed,
            from,
            to,
            note,
        } => {
            let store = Arc::new(open_store(&database)?);
            let args = ReplayArgs {
                track,
                speed,
                from,
                to,
                note,
            };
            cmd_replay(args, &config, store, cli.quiet).await?;
        }
        Commands::End { at } => {
            let store = Arc::new(open_store(&database)?);
            cmd_end(at, &config, store, cli.quiet).await?;
        }
        Commands::Cancel => {
            let store = Arc::new(open_store(&database)?);
            cmd_cancel(&config, store, cli.quiet).await?;
        }
        Commands::Routes {
            filter,
            format,
            oldest_first,
        } => {
            let store = open_store(&database)?;
            cmd_routes(&store, &filter, oldest_first, format, output, &opts)?;
        }
        Commands::Show { id, format } => {
            let store = open_store(&database)?;
            cmd_show(&store, id, format, output, &opts)?;
        }
        Commands::Delete { id } => {
            let store = open_store(&database)?;
            cmd_delete(&store, id, cli.quiet)?;
        }
        Commands::Export { format, id, filter } => {
            let store = open_store(&database)?;
            cmd_export(&store, format, id, &filter, output, cli.quiet)?;
        }
        Commands::Import { input } => {
            let store = open_store(&database)?;
            cmd_import(&store, input, cli.quiet)?;
        }
        Commands::Stats { format } => {
            let store = open_store(&database)?;
            cmd_stats(&store, format, output, &opts)?;
        }
        Commands::Config { action } => cmd_config(action, &config)?,
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}
