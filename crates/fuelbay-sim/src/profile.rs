//! What each vehicle does during a run.

use serde::{Deserialize, Serialize};

use fuelbay_core::{Amounts, Population, VehicleId};

use crate::timing::TimingConfig;

/// Plan of an ordinary vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerProfile {
    /// The vehicle.
    pub id: VehicleId,
    /// Withdrawn on every trip.
    pub amounts: Amounts,
    /// Planned trips.
    pub trips: u32,
    /// Delays.
    pub timing: TimingConfig,
}

/// Plan of a supply vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerProfile {
    /// The vehicle.
    pub id: VehicleId,
    /// Deposited on every trip.
    pub delivery: Amounts,
    /// Withdrawn after each deposit for the flight back, if any.
    pub return_leg: Option<Amounts>,
    /// Planned trips.
    pub trips: u32,
    /// Delays.
    pub timing: TimingConfig,
}

/// Plan of any vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum AgentProfile {
    /// An ordinary vehicle.
    Consumer(ConsumerProfile),
    /// A supply vehicle.
    Producer(ProducerProfile),
}

impl AgentProfile {
    /// The vehicle.
    pub fn vehicle(&self) -> VehicleId {
        match self {
            AgentProfile::Consumer(profile) => profile.id,
            AgentProfile::Producer(profile) => profile.id,
        }
    }

    /// Planned trips.
    pub fn trips(&self) -> u32 {
        match self {
            AgentProfile::Consumer(profile) => profile.trips,
            AgentProfile::Producer(profile) => profile.trips,
        }
    }

    /// Population the vehicle is counted in.
    pub fn population(&self) -> Population {
        match self {
            AgentProfile::Consumer(_) => Population::Consumers,
            AgentProfile::Producer(_) => Population::Producers,
        }
    }

    /// Every amount the vehicle will ever request.
    pub fn requested_amounts(&self) -> Vec<Amounts> {
        match self {
            AgentProfile::Consumer(profile) => vec![profile.amounts],
            AgentProfile::Producer(profile) => {
                std::iter::once(profile.delivery).chain(profile.return_leg).collect()
            }
        }
    }
}

impl From<ConsumerProfile> for AgentProfile {
    fn from(profile: ConsumerProfile) -> Self {
        AgentProfile::Consumer(profile)
    }
}

impl From<ProducerProfile> for AgentProfile {
    fn from(profile: ProducerProfile) -> Self {
        AgentProfile::Producer(profile)
    }
}
