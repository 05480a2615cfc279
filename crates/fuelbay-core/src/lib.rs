//! Fuelbay Core - Station Admission Monitor
//!
//! This crate provides the synchronization core of a fuel station shared by
//! many vehicle threads. It includes:
//!
//! - [`Facility`]: The monitor owning slots, levels and wait queues
//! - [`Reservation`]: A granted request awaiting settlement
//! - [`PopulationGuard`]: Retires a consumer or producer on drop
//! - [`CancelToken`]: Cooperative cancellation of blocked waits
//! - Configuration types for customizing behavior
//!
//! # Quick Start
//!
//! ```
//! use fuelbay_core::prelude::*;
//!
//! let facility = Facility::new(
//!     StationConfig::minimal()
//!         .with_consumers(1)
//!         .with_producers(1),
//! )
//! .unwrap();
//!
//! // Restock, then refuel.
//! let delivery = facility.deposit(VehicleId::supply(1), Amounts::new(40, 30)).unwrap();
//! delivery.into_reservation().unwrap().settle();
//!
//! match facility.acquire(VehicleId::ordinary(1), Amounts::new(10, 10)).unwrap() {
//!     Admission::Granted(reservation) => {
//!         assert_eq!(reservation.settle(), Amounts::new(30, 20));
//!     }
//!     Admission::Aborted => unreachable!(),
//! }
//! ```
//!
//! # Guarantees
//!
//! 1. **Conservation**: levels change only on settlement, by the reserved amount
//! 2. **No overbooking**: reservations never exceed stock or free space
//! 3. **Fairness**: under the default policy no request overtakes an earlier one
//!    in the same queue
//! 4. **Termination**: once the relieving population is gone, waiters that can
//!    no longer be served are aborted instead of blocking forever

pub mod cancel;
pub mod config;
pub mod error;
pub mod facility;
pub mod ledger;
pub mod lifecycle;
pub mod types;

mod request;

// Re-export main types at crate root
pub use cancel::{CancelToken, Interrupted};
pub use config::{AdmissionPolicy, DepositMode, StationConfig};
pub use error::{StationError, StationResult};
pub use facility::{
    Admission, Facility, IntoShared, Reservation, SharedFacility, StationCounters,
    StationSnapshot,
};
pub use ledger::{Hold, Ledger, LedgerSnapshot};
pub use lifecycle::{LifecycleTracker, Population, PopulationGuard};
pub use types::{Amounts, Direction, Resource, VehicleId, VehicleKind};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use fuelbay_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cancel::CancelToken;
    pub use crate::config::{AdmissionPolicy, DepositMode, StationConfig};
    pub use crate::error::{StationError, StationResult};
    pub use crate::facility::{Admission, Facility, IntoShared, Reservation, SharedFacility};
    pub use crate::lifecycle::{Population, PopulationGuard};
    pub use crate::types::{Amounts, Direction, VehicleId};
}
