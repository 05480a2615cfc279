//! Fuelbay Observability
//!
//! This crate provides observability features for the fuelbay station,
//! including:
//!
//! - [`MetricsCollector`]: Collects grant, wait and flow metrics
//! - [`RunReport`]: Complete reports of a simulation run
//! - [`EventDispatcher`]: Observable event system
//!
//! # Metrics Collection
//!
//! ```
//! use std::time::Duration;
//! use fuelbay_core::{Amounts, Direction, VehicleId};
//! use fuelbay_observe::MetricsCollector;
//!
//! let collector = MetricsCollector::new();
//! collector.record_start();
//! collector.record_grant(VehicleId::ordinary(1), Direction::Consume, Duration::ZERO);
//! collector.record_settle(VehicleId::ordinary(1), Direction::Consume, Amounts::uniform(5));
//! collector.record_end();
//!
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.withdrawn(), Amounts::uniform(5));
//! ```
//!
//! # Event Subscription
//!
//! ```
//! use std::sync::Arc;
//! use fuelbay_core::{Direction, VehicleId};
//! use fuelbay_observe::{EventDispatcher, LoggingSubscriber, StationEvent};
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher.subscribe(Arc::new(LoggingSubscriber::new()));
//!
//! dispatcher.emit(StationEvent::Aborted {
//!     vehicle: VehicleId::ordinary(1),
//!     direction: Direction::Consume,
//! });
//! ```

pub mod events;
pub mod metrics;
pub mod report;

// Re-export main types
pub use events::{
    CollectingSubscriber, EventDispatcher, EventSubscriber, LoggingSubscriber, StationEvent,
};
pub use metrics::{
    ConservationDelta, DirectionMetrics, MetricsCollector, MetricsSnapshot, TimingMetrics,
    VehicleStats,
};
pub use report::{
    Diagnostic, DiagnosticLevel, RunId, RunReport, VehicleEnding, VehicleOutcome, format_wait,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::events::{EventDispatcher, EventSubscriber, StationEvent};
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
    pub use crate::report::{RunReport, VehicleEnding, VehicleOutcome};
}
