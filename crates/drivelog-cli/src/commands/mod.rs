//! Command implementations for the CLI.

mod config;
mod drive;
mod routes;
mod transfer;

pub use config::cmd_config;
pub use drive::{ReplayArgs, cmd_cancel, cmd_end, cmd_replay};
pub use routes::{cmd_delete, cmd_routes, cmd_show, cmd_stats};
pub use transfer::{cmd_export, cmd_import};
