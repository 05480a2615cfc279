//! Config command - Print the effective configuration.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use super::{ConfigOverrides, load_config};

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Execute the config command.
pub fn execute(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    let config = args.overrides.apply(load_config(config_path)?);
    let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", text);
    Ok(())
}
