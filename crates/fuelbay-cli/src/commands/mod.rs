//! Subcommands.

pub mod config;
pub mod run;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use fuelbay_core::{AdmissionPolicy, Amounts, DepositMode};
use fuelbay_sim::SimulationConfig;

/// Overrides shared by every command that builds a configuration.
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    /// Number of ordinary vehicles
    #[arg(long)]
    pub consumers: Option<u32>,

    /// Number of supply vehicles
    #[arg(long)]
    pub producers: Option<u32>,

    /// Trips per vehicle
    #[arg(long)]
    pub trips: Option<u32>,

    /// Number of docking slots
    #[arg(long)]
    pub docks: Option<u32>,

    /// Nitrogen capacity
    #[arg(long)]
    pub capacity_nitrogen: Option<u64>,

    /// Quantum capacity
    #[arg(long)]
    pub capacity_quantum: Option<u64>,

    /// Initial level of both resources
    #[arg(long)]
    pub initial: Option<u64>,

    /// Wake policy
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Whether deposits occupy a dock
    #[arg(long, value_enum)]
    pub deposit_mode: Option<DepositModeArg>,

    /// Disable the supply vehicles' return leg
    #[arg(long)]
    pub no_return_leg: bool,

    /// Seed for every delay
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Wake policy choices.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum PolicyArg {
    /// Stop at the first request that cannot be served
    StrictFifo,
    /// Skip requests that cannot be served yet
    ScanThrough,
}

impl From<PolicyArg> for AdmissionPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::StrictFifo => AdmissionPolicy::StrictFifo,
            PolicyArg::ScanThrough => AdmissionPolicy::ScanThrough,
        }
    }
}

/// Deposit mode choices.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum DepositModeArg {
    /// Deposits hold a dock until settled
    Docked,
    /// Deposits only need storage space
    Dockless,
}

impl From<DepositModeArg> for DepositMode {
    fn from(mode: DepositModeArg) -> Self {
        match mode {
            DepositModeArg::Docked => DepositMode::Docked,
            DepositModeArg::Dockless => DepositMode::Dockless,
        }
    }
}

impl ConfigOverrides {
    /// Apply the overrides on top of `config`.
    pub fn apply(&self, mut config: SimulationConfig) -> SimulationConfig {
        if let Some(consumers) = self.consumers {
            config.fleet.consumers = consumers;
        }
        if let Some(producers) = self.producers {
            config.fleet.producers = producers;
        }
        if let Some(trips) = self.trips {
            config.fleet.trips = trips;
        }
        if let Some(docks) = self.docks {
            config.station.docks = docks;
        }
        if let Some(nitrogen) = self.capacity_nitrogen {
            config.station.capacity.nitrogen = nitrogen;
        }
        if let Some(quantum) = self.capacity_quantum {
            config.station.capacity.quantum = quantum;
        }
        match self.initial {
            Some(initial) => config.station.initial_levels = Amounts::uniform(initial),
            // A new capacity without new levels starts half full.
            None if self.capacity_nitrogen.is_some() || self.capacity_quantum.is_some() => {
                let capacity = config.station.capacity;
                config.station.initial_levels =
                    Amounts::new(capacity.nitrogen / 2, capacity.quantum / 2);
            }
            None => {}
        }
        if let Some(policy) = self.policy {
            config.station.policy = policy.into();
        }
        if let Some(mode) = self.deposit_mode {
            config.station.deposit_mode = mode.into();
        }
        if self.no_return_leg {
            config.fleet.return_leg = None;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        config
    }
}

/// Load the configuration file if one was given, else the defaults.
pub fn load_config(path: Option<&Path>) -> Result<SimulationConfig> {
    match path {
        Some(path) => SimulationConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(SimulationConfig::default()),
    }
}
