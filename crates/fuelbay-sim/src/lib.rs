//! Fuelbay Simulation
//!
//! Vehicle agents and the driver that runs them against a
//! [`Facility`](fuelbay_core::Facility).
//!
//! Ordinary vehicles travel, withdraw fuel and leave; supply vehicles travel,
//! deposit fuel and optionally withdraw a return leg. Every vehicle runs on
//! its own thread and sleeps a randomized delay between station calls.
//!
//! # Quick Start
//!
//! ```
//! use fuelbay_core::Amounts;
//! use fuelbay_sim::Simulation;
//!
//! let report = Simulation::builder()
//!     .instant()
//!     .with_seed(42)
//!     .with_consumers(2)
//!     .with_producers(1)
//!     .with_initial_levels(Amounts::uniform(1_000))
//!     .build()?
//!     .run()?;
//!
//! assert!(report.conservation().is_balanced());
//! # Ok::<(), fuelbay_sim::SimError>(())
//! ```
//!
//! # Configuration Files
//!
//! [`SimulationConfig`] loads from TOML; every section is optional.
//!
//! ```
//! use fuelbay_sim::SimulationConfig;
//!
//! let config = SimulationConfig::from_toml_str(r#"
//!     seed = 3
//!     [fleet]
//!     consumers = 8
//! "#)?;
//! assert_eq!(config.fleet.consumers, 8);
//! assert_eq!(config.fleet.producers, 2);
//! # Ok::<(), fuelbay_sim::SimError>(())
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod profile;
pub mod simulation;
pub mod timing;

pub use agent::{AgentContext, AgentSummary, run_agent, run_consumer, run_producer};
pub use config::{FleetConfig, FleetTiming, SimulationConfig};
pub use error::{Result, SimError};
pub use profile::{AgentProfile, ConsumerProfile, ProducerProfile};
pub use simulation::{Simulation, SimulationBuilder, run_standalone};
pub use timing::{Clock, DelayRange, TimingConfig};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SimulationConfig;
    pub use crate::error::{Result, SimError};
    pub use crate::simulation::{Simulation, SimulationBuilder};
    pub use crate::timing::{DelayRange, TimingConfig};
}
