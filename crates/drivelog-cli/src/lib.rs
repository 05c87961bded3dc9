//! Command-line interface for the drivelog driving journal.
//!
//! The `drivelog` binary records drives through the same engine a mobile app
//! would embed, and browses the local route database.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `replay` | Record a drive by replaying a GPS track file |
//! | `end` | End a drive left active by an interrupted recording |
//! | `cancel` | Cancel a drive left active by an interrupted recording |
//! | `routes` | List recorded drives |
//! | `show` | Show one drive with its waypoints |
//! | `delete` | Delete a drive |
//! | `export` | Export drives as JSON, or one drive's waypoints as CSV |
//! | `import` | Import drives from a JSON export |
//! | `stats` | Show aggregate statistics |
//! | `config` | Manage configuration |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! Settings live in `~/.config/drivelog/config.toml` (or platform equivalent).
//! Top-level keys configure the CLI:
//!
//! - `database`: Route database path
//! - `geocoder_url`: Nominatim server for street addresses (needs the
//!   `http-geocoder` feature)
//! - `no_color`: Disable colored output
//!
//! The `[location]`, `[tracking]`, `[address]`, `[background]` and
//! `[session]` tables configure the engine.
//!
//! # Environment Variables
//!
//! - `DRIVELOG_DB`: Route database path (overridden by `--database`)
//! - `NO_COLOR`: Disable colored output when set
//! - `RUST_LOG`: Log filter when neither `--verbose` nor `--quiet` is given
//!
//! # Examples
//!
//! Record a drive from a track, ten times faster than real time:
//! ```bash
//! drivelog replay commute.json --speed 10 --note "Monday commute"
//! ```
//!
//! List this month's completed drives:
//! ```bash
//! drivelog routes --status completed --since 2025-06-01
//! ```
//!
//! Export one drive's waypoints for a spreadsheet:
//! ```bash
//! drivelog export --format csv --id <ID> --output drive.csv
//! ```

// Re-export core dependencies for convenience
pub use drivelog_core;
pub use drivelog_store;
pub use drivelog_types;
