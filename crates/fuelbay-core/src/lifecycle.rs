//! Lifecycle tracking of the two vehicle populations.
//!
//! Each direction of traffic depends on the other population: withdrawals
//! wait for producers to restock, deposits wait for consumers to make room.
//! Once the population a queue depends on reaches zero, the monitor aborts
//! that queue instead of letting it wait forever.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{StationError, StationResult};
use crate::facility::Facility;
use crate::types::Direction;

/// One of the two vehicle populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Population {
    /// Vehicles that withdraw resources.
    Consumers,
    /// Vehicles that deposit resources.
    Producers,
}

impl Population {
    /// The population whose activity can unblock requests of `direction`.
    pub fn relieving(direction: Direction) -> Population {
        match direction {
            Direction::Consume => Population::Producers,
            Direction::Supply => Population::Consumers,
        }
    }

    /// The queue that is stranded when this population is gone.
    pub fn dependent_queue(self) -> Direction {
        match self {
            Population::Producers => Direction::Consume,
            Population::Consumers => Direction::Supply,
        }
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Population::Consumers => write!(f, "consumers"),
            Population::Producers => write!(f, "producers"),
        }
    }
}

/// Live counts of both populations.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    consumers: u64,
    producers: u64,
}

impl LifecycleTracker {
    /// Create a tracker with the given initial counts.
    pub fn new(consumers: u64, producers: u64) -> Self {
        Self {
            consumers,
            producers,
        }
    }

    /// Live count of a population.
    pub fn live(&self, population: Population) -> u64 {
        match population {
            Population::Consumers => self.consumers,
            Population::Producers => self.producers,
        }
    }

    /// Check whether a population has died out.
    pub fn is_exhausted(&self, population: Population) -> bool {
        self.live(population) == 0
    }

    /// Check whether nobody is left to unblock requests of `direction`.
    ///
    /// `busy` relieving members are themselves blocked and cannot help.
    pub fn is_stranded(&self, direction: Direction, busy: u64) -> bool {
        self.live(Population::relieving(direction)) <= busy
    }

    /// Add one member to a population.
    pub fn register(&mut self, population: Population) -> u64 {
        let count = self.count_mut(population);
        *count += 1;
        *count
    }

    /// Remove one member from a population, returning how many remain.
    pub fn retire(&mut self, population: Population) -> StationResult<u64> {
        let count = self.count_mut(population);
        if *count == 0 {
            return Err(StationError::PopulationUnderflow { population });
        }
        *count -= 1;
        Ok(*count)
    }

    fn count_mut(&mut self, population: Population) -> &mut u64 {
        match population {
            Population::Consumers => &mut self.consumers,
            Population::Producers => &mut self.producers,
        }
    }
}

/// Retires one member of a population when dropped.
///
/// Agents hold one of these for their whole run so that the station learns
/// about their departure on every exit path, including cancellation and
/// unwinding.
#[must_use = "dropping the guard retires the population member immediately"]
pub struct PopulationGuard<'a> {
    facility: &'a Facility,
    population: Population,
    active: bool,
}

impl<'a> PopulationGuard<'a> {
    pub(crate) fn new(facility: &'a Facility, population: Population) -> Self {
        Self {
            facility,
            population,
            active: true,
        }
    }

    /// The population this guard belongs to.
    pub fn population(&self) -> Population {
        self.population
    }

    /// Retire now and report the remaining live count.
    pub fn retire(mut self) -> StationResult<u64> {
        self.active = false;
        self.facility.retire(self.population)
    }
}

impl Drop for PopulationGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = self.facility.retire(self.population) {
            warn!(population = %self.population, error = %e, "Population guard failed to retire");
        }
    }
}

impl fmt::Debug for PopulationGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulationGuard")
            .field("population", &self.population)
            .field("active", &self.active)
            .finish()
    }
}
