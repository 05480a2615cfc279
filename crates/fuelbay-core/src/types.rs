//! Value types shared by every station operation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two fungible resources stored by the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Nitrogen.
    Nitrogen,
    /// Quantum fluid.
    Quantum,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Nitrogen => write!(f, "nitrogen"),
            Resource::Quantum => write!(f, "quantum"),
        }
    }
}

/// A quantity of both resources, requested or offered together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amounts {
    /// Nitrogen units.
    pub nitrogen: u64,
    /// Quantum units.
    pub quantum: u64,
}

impl Amounts {
    /// No resources at all.
    pub const ZERO: Amounts = Amounts {
        nitrogen: 0,
        quantum: 0,
    };

    /// Create a new pair of amounts.
    pub const fn new(nitrogen: u64, quantum: u64) -> Self {
        Self { nitrogen, quantum }
    }

    /// The same amount of both resources.
    pub const fn uniform(units: u64) -> Self {
        Self::new(units, units)
    }

    /// Get the amount of one resource.
    pub fn get(&self, resource: Resource) -> u64 {
        match resource {
            Resource::Nitrogen => self.nitrogen,
            Resource::Quantum => self.quantum,
        }
    }

    /// Check whether both amounts fit within `limit`.
    pub fn fits_within(&self, limit: Amounts) -> bool {
        self.nitrogen <= limit.nitrogen && self.quantum <= limit.quantum
    }

    /// Component-wise sum, saturating at `u64::MAX`.
    pub fn saturating_add(self, other: Amounts) -> Amounts {
        Amounts::new(
            self.nitrogen.saturating_add(other.nitrogen),
            self.quantum.saturating_add(other.quantum),
        )
    }

    /// Component-wise difference, saturating at zero.
    pub fn saturating_sub(self, other: Amounts) -> Amounts {
        Amounts::new(
            self.nitrogen.saturating_sub(other.nitrogen),
            self.quantum.saturating_sub(other.quantum),
        )
    }

    /// Check whether both amounts are zero.
    pub fn is_zero(&self) -> bool {
        self.nitrogen == 0 && self.quantum == 0
    }
}

impl fmt::Display for Amounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}N/{}Q", self.nitrogen, self.quantum)
    }
}

/// The two kinds of vehicle visiting the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    /// Refuels at the station and leaves.
    Ordinary,
    /// Delivers resources and may refuel for the return leg.
    Supply,
}

/// Identifier of a vehicle, used for tracing and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleId {
    /// Vehicle kind.
    pub kind: VehicleKind,
    /// Number within its kind, starting at 1.
    pub number: u32,
}

impl VehicleId {
    /// Create a vehicle identifier.
    pub const fn new(kind: VehicleKind, number: u32) -> Self {
        Self { kind, number }
    }

    /// Identifier of an ordinary vehicle.
    pub const fn ordinary(number: u32) -> Self {
        Self::new(VehicleKind::Ordinary, number)
    }

    /// Identifier of a supply vehicle.
    pub const fn supply(number: u32) -> Self {
        Self::new(VehicleKind::Supply, number)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VehicleKind::Ordinary => write!(f, "ordinary-{}", self.number),
            VehicleKind::Supply => write!(f, "supply-{}", self.number),
        }
    }
}

/// Direction of a request, which is also the wait queue it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Withdrawal of stored resources.
    Consume,
    /// Deposit of resources into the station.
    Supply,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Consume => write!(f, "consume"),
            Direction::Supply => write!(f, "supply"),
        }
    }
}
