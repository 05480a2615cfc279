//! Simulation configuration, loadable from TOML.
//!
//! ```toml
//! seed = 7
//!
//! [station]
//! docks = 3
//! capacity = { nitrogen = 2000, quantum = 2000 }
//! initial_levels = { nitrogen = 1000, quantum = 1000 }
//! policy = "strict-fifo"
//!
//! [fleet]
//! consumers = 5
//! producers = 2
//! trips = 3
//! refuel = { nitrogen = 100, quantum = 100 }
//! delivery = { nitrogen = 600, quantum = 600 }
//! return_leg = { nitrogen = 50, quantum = 50 }
//!
//! [timing.consumer]
//! travel = { min = 400, max = 1000 }
//! service = { min = 50, max = 200 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use fuelbay_core::{Amounts, DepositMode, StationConfig, VehicleId};

use crate::error::{Result, SimError};
use crate::profile::{AgentProfile, ConsumerProfile, ProducerProfile};
use crate::timing::{DelayRange, TimingConfig};

/// Vehicles taking part in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Ordinary vehicles.
    pub consumers: u32,
    /// Supply vehicles.
    pub producers: u32,
    /// Trips per vehicle.
    pub trips: u32,
    /// Withdrawn by an ordinary vehicle on every trip.
    pub refuel: Amounts,
    /// Deposited by a supply vehicle on every trip.
    pub delivery: Amounts,
    /// Withdrawn by a supply vehicle after each deposit.
    pub return_leg: Option<Amounts>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            consumers: 5,
            producers: 2,
            trips: 3,
            refuel: Amounts::uniform(100),
            delivery: Amounts::uniform(600),
            return_leg: Some(Amounts::uniform(50)),
        }
    }
}

/// Delays of both vehicle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetTiming {
    /// Ordinary vehicles.
    pub consumer: TimingConfig,
    /// Supply vehicles.
    pub producer: TimingConfig,
}

impl FleetTiming {
    /// No delays at all.
    pub fn instant() -> Self {
        Self {
            consumer: TimingConfig::instant(),
            producer: TimingConfig::instant(),
        }
    }
}

impl Default for FleetTiming {
    fn default() -> Self {
        Self {
            consumer: TimingConfig {
                travel: DelayRange::new(400, 1_000),
                service: DelayRange::new(50, 200),
                turnaround: DelayRange::zero(),
            },
            producer: TimingConfig {
                travel: DelayRange::new(800, 1_500),
                service: DelayRange::new(100, 300),
                turnaround: DelayRange::zero(),
            },
        }
    }
}

/// Complete description of a run.
///
/// By default the station starts half full. The live consumer and producer
/// counts of the station section are ignored; the station always starts with
/// one live member per fleet vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for every delay; entropy when absent.
    pub seed: Option<u64>,
    /// Station layout.
    pub station: StationConfig,
    /// Vehicles.
    pub fleet: FleetConfig,
    /// Delays.
    pub timing: FleetTiming,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            station: StationConfig::standard()
                .with_capacity(Amounts::uniform(2_000))
                .with_initial_levels(Amounts::uniform(1_000)),
            fleet: FleetConfig::default(),
            timing: FleetTiming::default(),
        }
    }
}

impl SimulationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Station configuration with live counts taken from the fleet.
    pub fn station_config(&self) -> StationConfig {
        self.station
            .clone()
            .with_consumers(u64::from(self.fleet.consumers))
            .with_producers(u64::from(self.fleet.producers))
    }

    /// One profile per vehicle, ordinary vehicles first.
    pub fn profiles(&self) -> Vec<AgentProfile> {
        let consumers = (1..=self.fleet.consumers).map(|number| {
            AgentProfile::Consumer(ConsumerProfile {
                id: VehicleId::ordinary(number),
                amounts: self.fleet.refuel,
                trips: self.fleet.trips,
                timing: self.timing.consumer,
            })
        });
        let producers = (1..=self.fleet.producers).map(|number| {
            AgentProfile::Producer(ProducerProfile {
                id: VehicleId::supply(number),
                delivery: self.fleet.delivery,
                return_leg: self.fleet.return_leg,
                trips: self.fleet.trips,
                timing: self.timing.producer,
            })
        });
        consumers.chain(producers).collect()
    }

    /// Check for values no run can be built from.
    pub fn validate(&self) -> Result<()> {
        self.station.validate()?;

        if !self.timing.consumer.is_valid() || !self.timing.producer.is_valid() {
            return Err(SimError::InvalidConfig(
                "every delay range needs min <= max".to_string(),
            ));
        }

        let capacity = self.station.capacity;
        let mut requests = vec![("delivery", self.fleet.delivery)];
        if self.fleet.consumers > 0 {
            requests.push(("refuel", self.fleet.refuel));
        }
        if let Some(return_leg) = self.fleet.return_leg {
            requests.push(("return leg", return_leg));
        }
        for (label, amounts) in requests {
            if !amounts.fits_within(capacity) {
                return Err(SimError::InvalidConfig(format!(
                    "{} of {} exceeds station capacity {}",
                    label, amounts, capacity
                )));
            }
        }

        if self.station.docks == 0 {
            let needs_dock = self.fleet.consumers > 0
                || (self.fleet.producers > 0
                    && (self.fleet.return_leg.is_some()
                        || self.station.deposit_mode == DepositMode::Docked));
            if needs_dock {
                return Err(SimError::InvalidConfig(
                    "station has no docks but the fleet needs one".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Conditions that are legal but probably not what was meant.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let fleet = &self.fleet;

        if fleet.trips == 0 {
            warnings.push("trips is 0; no vehicle will visit the station".to_string());
        }

        if fleet.consumers > 0
            && fleet.producers == 0
            && !fleet.refuel.fits_within(self.station.initial_levels)
        {
            warnings.push(
                "no producers and initial levels below one refuel; every consumer will abort"
                    .to_string(),
            );
        }

        if let Some(return_leg) = fleet.return_leg {
            if !return_leg.fits_within(fleet.delivery) {
                warnings.push(format!(
                    "return leg {} exceeds delivery {}; producers drain the station",
                    return_leg, fleet.delivery
                ));
            }
        }

        let trips = u128::from(fleet.trips);
        let demand = |per_trip: u64| u128::from(fleet.consumers) * trips * u128::from(per_trip);
        let supply = |initial: u64, delivery: u64, back: u64| {
            u128::from(initial)
                + u128::from(fleet.producers) * trips * u128::from(delivery.saturating_sub(back))
        };
        let back = fleet.return_leg.unwrap_or(Amounts::ZERO);
        let initial = self.station.initial_levels;
        if demand(fleet.refuel.nitrogen)
            > supply(initial.nitrogen, fleet.delivery.nitrogen, back.nitrogen)
            || demand(fleet.refuel.quantum)
                > supply(initial.quantum, fleet.delivery.quantum, back.quantum)
        {
            warnings.push(
                "total demand exceeds total supply; some consumers will abort".to_string(),
            );
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.warnings().is_empty());

        let station = config.station_config();
        assert_eq!(station.initial_levels, Amounts::uniform(1_000));
        assert_eq!(station.consumers, 5);
        assert_eq!(station.producers, 2);
        assert_eq!(config.profiles().len(), 7);
    }

    #[test]
    fn test_parse_toml() {
        let config = SimulationConfig::from_toml_str(
            r#"
            seed = 11

            [station]
            docks = 2
            capacity = { nitrogen = 500, quantum = 400 }
            policy = "scan-through"
            deposit_mode = "dockless"

            [fleet]
            consumers = 3
            producers = 1
            trips = 4
            refuel = { nitrogen = 20, quantum = 10 }

            [timing.producer]
            travel = { min = 1, max = 2 }
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, Some(11));
        assert_eq!(config.station.docks, 2);
        assert_eq!(config.station.capacity, Amounts::new(500, 400));
        assert_eq!(config.station.policy, fuelbay_core::AdmissionPolicy::ScanThrough);
        assert_eq!(config.station.deposit_mode, DepositMode::Dockless);
        assert_eq!(config.fleet.refuel, Amounts::new(20, 10));
        assert_eq!(config.fleet.delivery, Amounts::uniform(600));
        assert_eq!(config.timing.producer.travel, DelayRange::new(1, 2));
        assert_eq!(config.timing.producer.service, DelayRange::zero());
    }

    #[test]
    fn test_parse_rejects_negative_amounts() {
        let result = SimulationConfig::from_toml_str(
            r#"
            [fleet]
            refuel = { nitrogen = -5, quantum = 10 }
            "#,
        );
        assert!(matches!(result, Err(SimError::ConfigParse(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_requests() {
        let mut config = SimulationConfig::default();
        config.fleet.delivery = Amounts::new(2_001, 0);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delivery"));
    }

    #[test]
    fn test_validate_rejects_dockless_station() {
        let mut config = SimulationConfig::default();
        config.station.docks = 0;
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));

        config.fleet.consumers = 0;
        config.fleet.return_leg = None;
        config.station.deposit_mode = DepositMode::Dockless;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_warnings() {
        let mut config = SimulationConfig::default();
        config.fleet.producers = 0;
        config.station.initial_levels = Amounts::ZERO;
        let warnings = config.warnings();
        assert!(warnings.iter().any(|w| w.contains("every consumer will abort")));
        assert!(warnings.iter().any(|w| w.contains("demand exceeds")));

        let mut config = SimulationConfig::default();
        config.fleet.return_leg = Some(Amounts::uniform(700));
        assert!(config.warnings().iter().any(|w| w.contains("return leg")));
    }
}
