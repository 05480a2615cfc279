//! Observable events during a station run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use fuelbay_core::{Amounts, Direction, Population, VehicleId};

/// Events that can be observed while vehicles use the station.
#[derive(Debug, Clone)]
pub enum StationEvent {
    /// A vehicle reached the station and issued a request.
    VehicleArrived {
        /// Requesting vehicle.
        vehicle: VehicleId,
        /// Request direction.
        direction: Direction,
        /// Requested amounts.
        amounts: Amounts,
    },
    /// A request was granted.
    Granted {
        /// Requesting vehicle.
        vehicle: VehicleId,
        /// Request direction.
        direction: Direction,
        /// Reserved amounts.
        amounts: Amounts,
        /// Time spent queued.
        waited: Duration,
    },
    /// A grant was settled.
    Settled {
        /// Vehicle that settled.
        vehicle: VehicleId,
        /// Grant direction.
        direction: Direction,
        /// Moved amounts.
        amounts: Amounts,
        /// Stored levels afterwards.
        levels: Amounts,
    },
    /// A request was aborted.
    Aborted {
        /// Requesting vehicle.
        vehicle: VehicleId,
        /// Request direction.
        direction: Direction,
    },
    /// A queued wait was cancelled.
    Cancelled {
        /// Requesting vehicle.
        vehicle: VehicleId,
        /// Request direction.
        direction: Direction,
    },
    /// A vehicle left the station for good.
    VehicleRetired {
        /// Retiring vehicle.
        vehicle: VehicleId,
        /// Population it belonged to.
        population: Population,
        /// Trips it completed.
        trips: u32,
    },
    /// An error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

impl StationEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            StationEvent::VehicleArrived { .. } => "vehicle_arrived",
            StationEvent::Granted { .. } => "granted",
            StationEvent::Settled { .. } => "settled",
            StationEvent::Aborted { .. } => "aborted",
            StationEvent::Cancelled { .. } => "cancelled",
            StationEvent::VehicleRetired { .. } => "vehicle_retired",
            StationEvent::Error { .. } => "error",
        }
    }

    /// The vehicle the event is about, if any.
    pub fn vehicle(&self) -> Option<VehicleId> {
        match self {
            StationEvent::VehicleArrived { vehicle, .. }
            | StationEvent::Granted { vehicle, .. }
            | StationEvent::Settled { vehicle, .. }
            | StationEvent::Aborted { vehicle, .. }
            | StationEvent::Cancelled { vehicle, .. }
            | StationEvent::VehicleRetired { vehicle, .. } => Some(*vehicle),
            StationEvent::Error { .. } => None,
        }
    }
}

/// Subscriber for station events.
pub trait EventSubscriber: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &StationEvent);

    /// Filter for event types this subscriber is interested in.
    /// Returns `None` to receive all events.
    fn event_filter(&self) -> Option<Vec<&'static str>> {
        None
    }
}

/// A simple subscriber that logs events through `tracing`.
pub struct LoggingSubscriber;

impl LoggingSubscriber {
    /// Create a new logging subscriber.
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &StationEvent) {
        match event {
            StationEvent::VehicleArrived {
                vehicle,
                direction,
                amounts,
            } => {
                tracing::trace!(
                    event = "vehicle_arrived",
                    vehicle = %vehicle,
                    direction = %direction,
                    nitrogen = amounts.nitrogen,
                    quantum = amounts.quantum,
                    "Vehicle arrived"
                );
            }
            StationEvent::Granted {
                vehicle,
                direction,
                waited,
                ..
            } => {
                tracing::debug!(
                    event = "granted",
                    vehicle = %vehicle,
                    direction = %direction,
                    waited_ms = waited.as_millis(),
                    "Request granted"
                );
            }
            StationEvent::Settled {
                vehicle,
                direction,
                amounts,
                levels,
            } => {
                tracing::debug!(
                    event = "settled",
                    vehicle = %vehicle,
                    direction = %direction,
                    amounts = %amounts,
                    levels = %levels,
                    "Grant settled"
                );
            }
            StationEvent::Aborted { vehicle, direction } => {
                tracing::warn!(
                    event = "aborted",
                    vehicle = %vehicle,
                    direction = %direction,
                    "Request aborted"
                );
            }
            StationEvent::Cancelled { vehicle, direction } => {
                tracing::warn!(
                    event = "cancelled",
                    vehicle = %vehicle,
                    direction = %direction,
                    "Wait cancelled"
                );
            }
            StationEvent::VehicleRetired {
                vehicle,
                population,
                trips,
            } => {
                tracing::info!(
                    event = "vehicle_retired",
                    vehicle = %vehicle,
                    population = %population,
                    trips = trips,
                    "Vehicle retired"
                );
            }
            StationEvent::Error { message } => {
                tracing::error!(event = "error", message = message, "Error occurred");
            }
        }
    }
}

/// A subscriber that collects events for later analysis.
pub struct CollectingSubscriber {
    events: RwLock<Vec<(Instant, StationEvent)>>,
    max_events: usize,
}

impl CollectingSubscriber {
    /// Create a new collecting subscriber.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<(Instant, StationEvent)> {
        self.events.read().clone()
    }

    /// Collected events of one type, in arrival order.
    pub fn of_type(&self, event_type: &str) -> Vec<StationEvent> {
        self.events
            .read()
            .iter()
            .filter(|(_, event)| event.event_type() == event_type)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Clear collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get event count.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn on_event(&self, event: &StationEvent) {
        let mut events = self.events.write();
        if events.len() < self.max_events {
            events.push((Instant::now(), event.clone()));
        }
    }
}

/// Event dispatcher that manages subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: StationEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            if let Some(filter) = subscriber.event_filter() {
                if !filter.contains(&event.event_type()) {
                    continue;
                }
            }
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
