//! Configuration types for the station.
//!
//! A [`StationConfig`] fixes everything about a facility that may not change
//! after construction: docking slots, capacities, the wake policy and the
//! deposit mode.

use serde::{Deserialize, Serialize};

use crate::error::{StationError, StationResult};
use crate::types::Amounts;

/// How the wake policy walks a wait queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionPolicy {
    /// Grant from the head; stop at the first entry that cannot be served.
    ///
    /// A later request is never admitted ahead of an earlier one in the same
    /// queue.
    #[default]
    StrictFifo,
    /// Grant every servable entry in arrival order, skipping the ones that
    /// cannot be served yet.
    ScanThrough,
}

/// Whether a deposit occupies a docking slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepositMode {
    /// A deposit needs a free slot and holds it until settled.
    #[default]
    Docked,
    /// A deposit only needs storage space.
    Dockless,
}

impl DepositMode {
    /// Check whether deposits occupy a slot.
    pub fn uses_slot(&self) -> bool {
        matches!(self, DepositMode::Docked)
    }
}

/// Fixed configuration of a facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Number of docking slots.
    pub docks: u32,

    /// Maximum stored amount of each resource.
    pub capacity: Amounts,

    /// Stored amount at construction.
    ///
    /// Defaults to empty.
    pub initial_levels: Amounts,

    /// Consumers alive at construction.
    pub consumers: u64,

    /// Producers alive at construction.
    pub producers: u64,

    /// Wake policy for both queues.
    pub policy: AdmissionPolicy,

    /// Whether deposits occupy a slot.
    pub deposit_mode: DepositMode,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            docks: 3,
            capacity: Amounts::uniform(1_000),
            initial_levels: Amounts::ZERO,
            consumers: 0,
            producers: 0,
            policy: AdmissionPolicy::StrictFifo,
            deposit_mode: DepositMode::Docked,
        }
    }
}

impl StationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of docking slots.
    pub fn with_docks(mut self, docks: u32) -> Self {
        self.docks = docks;
        self
    }

    /// Set the storage capacity.
    pub fn with_capacity(mut self, capacity: Amounts) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the stored amount at construction.
    pub fn with_initial_levels(mut self, levels: Amounts) -> Self {
        self.initial_levels = levels;
        self
    }

    /// Set the number of consumers alive at construction.
    pub fn with_consumers(mut self, consumers: u64) -> Self {
        self.consumers = consumers;
        self
    }

    /// Set the number of producers alive at construction.
    pub fn with_producers(mut self, producers: u64) -> Self {
        self.producers = producers;
        self
    }

    /// Set the wake policy.
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the deposit mode.
    pub fn with_deposit_mode(mut self, mode: DepositMode) -> Self {
        self.deposit_mode = mode;
        self
    }

    /// A single-dock station, handy for tests.
    pub fn minimal() -> Self {
        Self {
            docks: 1,
            capacity: Amounts::uniform(100),
            ..Self::default()
        }
    }

    /// The usual three-dock station.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Check the configuration for values no facility can be built from.
    pub fn validate(&self) -> StationResult<()> {
        if !self.initial_levels.fits_within(self.capacity) {
            return Err(StationError::InvalidConfig(format!(
                "initial levels {} exceed capacity {}",
                self.initial_levels, self.capacity
            )));
        }
        Ok(())
    }
}
