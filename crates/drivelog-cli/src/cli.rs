//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Export file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Whole routes, importable with `drivelog import`
    #[default]
    Json,
    /// One route's waypoints
    Csv,
}

/// Route selection shared by listing and export commands
#[derive(Debug, Clone, Default, Args)]
pub struct RouteFilterArgs {
    /// Only routes with this status (active, completed, cancelled)
    #[arg(long)]
    pub status: Option<String>,

    /// Routes started at or after this date/time (RFC3339 or YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Routes started at or before this date/time (RFC3339 or YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,

    /// Maximum number of routes (0 for all)
    #[arg(short = 'n', long, default_value = "0")]
    pub limit: u32,
}

#[derive(Parser)]
#[command(name = "drivelog")]
#[command(author, version, about = "Driving journal: record, replay and browse drives", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Route database path (overrides config)
    #[arg(long, global = true, env = "DRIVELOG_DB")]
    pub database: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a drive by replaying a recorded GPS track
    Replay {
        /// Track file (JSON)
        track: PathBuf,

        /// Playback speed multiplier (1 = real time)
        #[arg(short, long, default_value = "60", value_parser = parse_speed)]
        speed: f64,

        /// Label the start instead of resolving the first fix
        #[arg(long)]
        from: Option<String>,

        /// Label the end instead of using the last fix
        #[arg(long)]
        to: Option<String>,

        /// Note attached to the drive
        #[arg(long)]
        note: Option<String>,
    },

    /// End a drive left active by an interrupted recording
    End {
        /// End location label
        #[arg(long = "at")]
        at: String,
    },

    /// Cancel a drive left active by an interrupted recording
    Cancel,

    /// List recorded drives
    #[command(alias = "ls")]
    Routes {
        #[command(flatten)]
        filter: RouteFilterArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Oldest first
        #[arg(long)]
        oldest_first: bool,
    },

    /// Show one drive with its waypoints
    Show {
        /// Route id
        id: Uuid,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a drive
    #[command(alias = "rm")]
    Delete {
        /// Route id
        id: Uuid,
    },

    /// Export drives
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Route id (required for CSV)
        #[arg(long)]
        id: Option<Uuid>,

        #[command(flatten)]
        filter: RouteFilterArgs,
    },

    /// Import drives from a JSON export
    Import {
        /// Input file (default: stdin)
        input: Option<PathBuf>,
    },

    /// Show aggregate statistics
    Stats {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration file for errors
    Validate,
}

/// Slowest accepted playback speed.
pub const MIN_SPEED: f64 = 0.001;

/// Fastest accepted playback speed.
pub const MAX_SPEED: f64 = 1_000_000.0;

/// Parse a playback speed
fn parse_speed(s: &str) -> Result<f64, String> {
    let speed: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if (MIN_SPEED..=MAX_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(format!(
            "Invalid speed '{}'. Use a number from {} to {}",
            s, MIN_SPEED, MAX_SPEED
        ))
    }
}
