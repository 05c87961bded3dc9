//! Config command - inspect and initialize the configuration file.

use std::path::Path;

use anyhow::{Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;

/// Execute the config command.
pub fn cmd_config(action: ConfigAction, config: &Config) -> Result<()> {
    let path = Config::path();
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init { force } => {
            init_config(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Validate => {
            validate_config(&path)?;
            println!("Configuration is valid");
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }
    Config::default().save_to(path)
}

fn validate_config(path: &Path) -> Result<()> {
    let config = if path.exists() {
        Config::load_from(path)?
    } else {
        Config::default()
    };
    config.engine.validate()?;
    Ok(())
}
