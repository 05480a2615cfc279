//! Run command - Execute a simulation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use fuelbay_core::CancelToken;
use fuelbay_observe::{LoggingSubscriber, RunReport, VehicleEnding, format_wait};
use fuelbay_sim::{FleetTiming, SimulationBuilder};

use super::{ConfigOverrides, load_config};
use crate::OutputFormat;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Skip every travel and service delay
    #[arg(long)]
    pub instant: bool,

    /// Cancel the run after this many milliseconds
    #[arg(long)]
    pub cancel_after: Option<u64>,

    /// Log every station event
    #[arg(long)]
    pub events: bool,

    /// Show per-vehicle metrics
    #[arg(long)]
    pub metrics: bool,
}

/// Execute the run command.
pub fn execute(
    args: RunArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let mut config = args.overrides.apply(load_config(config_path)?);
    if args.instant {
        config.timing = FleetTiming::instant();
    }

    let mut builder = SimulationBuilder::from_config(config);
    if args.events {
        builder = builder.with_event_subscriber(Arc::new(LoggingSubscriber::new()));
    }
    let simulation = builder.build().context("Invalid configuration")?;

    if !quiet {
        tracing::info!(
            consumers = simulation.config().fleet.consumers,
            producers = simulation.config().fleet.producers,
            "Running simulation"
        );
    }

    let cancel = CancelToken::new();
    let report = std::thread::scope(|s| {
        if let Some(millis) = args.cancel_after {
            let timer = cancel.clone();
            s.spawn(move || {
                if timer.sleep(Duration::from_millis(millis)).is_ok() {
                    timer.cancel();
                }
            });
        }
        let report = simulation.run_with_cancel(&cancel);
        cancel.cancel();
        report
    })
    .context("Simulation failed")?;

    match format {
        OutputFormat::Human => {
            if !quiet {
                print!("{}", report.to_text());
            }
            if args.metrics {
                print_vehicle_metrics(&report);
            }
        }
        OutputFormat::Json => println!("{}", report.to_json_pretty()),
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(&report.to_json())?),
    }

    if report.is_sound() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Run finished with errors"))
    }
}

fn print_vehicle_metrics(report: &RunReport) {
    println!("\nVehicle metrics:");
    for outcome in &report.vehicles {
        let Some(stats) = report.metrics.vehicle(outcome.vehicle) else {
            continue;
        };
        let marker = match outcome.ending {
            VehicleEnding::Completed => ' ',
            _ => '!',
        };
        println!(
            " {} {:<6} grants {:>3}  waited {:>10}  withdrawn {}  deposited {}",
            marker,
            outcome.vehicle.to_string(),
            stats.grants,
            format_wait(stats.total_wait),
            outcome.withdrawn,
            outcome.deposited
        );
    }
}
