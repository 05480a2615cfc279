//! Error types for the station monitor.
//!
//! Only caller-input faults and cancellation are errors. A request the station
//! can never serve is reported as [`Admission::Aborted`](crate::Admission),
//! which is a normal outcome rather than a failure.

use thiserror::Error;

use crate::lifecycle::Population;
use crate::types::{Resource, VehicleId};

/// Errors raised by the station.
#[derive(Debug, Error)]
pub enum StationError {
    /// A single request asks for more than the station can ever hold.
    #[error("Requested {requested} units of {resource}, station capacity is {capacity}")]
    AmountExceedsCapacity {
        /// Resource that was over-requested.
        resource: Resource,
        /// Requested amount.
        requested: u64,
        /// Station capacity for that resource.
        capacity: u64,
    },

    /// A slot-bearing operation was issued against a station without docks.
    #[error("Station has no docking slots")]
    NoDocks,

    /// The station configuration is malformed.
    #[error("Invalid station configuration: {0}")]
    InvalidConfig(String),

    /// The caller's wait was cancelled before it was served.
    #[error("Wait cancelled for {vehicle}")]
    Cancelled {
        /// Vehicle whose wait was cancelled.
        vehicle: VehicleId,
    },

    /// A population was retired more times than it was registered.
    #[error("No live {population} left to retire")]
    PopulationUnderflow {
        /// Population that underflowed.
        population: Population,
    },
}

impl StationError {
    /// Check whether this error is a caller-input fault.
    pub fn is_config_fault(&self) -> bool {
        matches!(
            self,
            StationError::AmountExceedsCapacity { .. }
                | StationError::NoDocks
                | StationError::InvalidConfig(_)
        )
    }

    /// Check whether this error reports a cancelled wait.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StationError::Cancelled { .. })
    }
}

/// Result type for station operations.
pub type StationResult<T> = std::result::Result<T, StationError>;
