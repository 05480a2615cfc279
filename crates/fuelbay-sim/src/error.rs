//! Error types for the simulation driver.

use thiserror::Error;

use fuelbay_core::StationError;

/// Errors raised while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The station rejected an operation.
    #[error("Station error: {0}")]
    Station(#[from] StationError),

    /// The simulation configuration is malformed.
    #[error("Invalid simulation configuration: {0}")]
    InvalidConfig(String),

    /// A vehicle thread panicked.
    #[error("Vehicle thread panicked: {0}")]
    AgentPanicked(String),

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error reading the configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
