//! Validate command - Check a configuration without running it.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::{ConfigOverrides, load_config};
use crate::OutputFormat;

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Validation result.
#[derive(Debug, Serialize)]
struct ValidationResult {
    valid: bool,
    source: String,
    consumers: u32,
    producers: u32,
    docks: u32,
    warnings: Vec<String>,
    errors: Vec<String>,
}

/// Execute the validate command.
pub fn execute(args: ValidateArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let source = config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());

    let mut result = ValidationResult {
        valid: true,
        source,
        consumers: 0,
        producers: 0,
        docks: 0,
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    match load_config(config_path) {
        Ok(config) => {
            let config = args.overrides.apply(config);
            result.consumers = config.fleet.consumers;
            result.producers = config.fleet.producers;
            result.docks = config.station.docks;
            result.warnings = config.warnings();

            if let Err(e) = config.validate() {
                result.valid = false;
                result.errors.push(e.to_string());
            }
            if args.strict && !result.warnings.is_empty() {
                result.valid = false;
            }
        }
        Err(e) => {
            result.valid = false;
            result.errors.push(format!("{:#}", e));
        }
    }

    // Output results
    match format {
        OutputFormat::Human => {
            if result.valid {
                println!("Configuration is valid: {}", result.source);
                println!("  Consumers: {}", result.consumers);
                println!("  Producers: {}", result.producers);
                println!("  Docks: {}", result.docks);
            } else {
                println!("Configuration is INVALID: {}", result.source);
                for error in &result.errors {
                    println!("  Error: {}", error);
                }
            }

            if !result.warnings.is_empty() {
                println!("\nWarnings:");
                for warning in &result.warnings {
                    println!("  - {}", warning);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    if result.valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Validation failed"))
    }
}
