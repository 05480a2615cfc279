//! Simulation driver.
//!
//! A [`Simulation`] spawns one thread per vehicle against a fresh
//! [`Facility`], joins them and assembles a [`RunReport`].

use std::sync::Arc;
use std::thread;

use fuelbay_core::{
    AdmissionPolicy, Amounts, CancelToken, DepositMode, Facility, Population, StationConfig,
};
use fuelbay_observe::{
    EventDispatcher, EventSubscriber, MetricsCollector, RunReport, VehicleEnding, VehicleOutcome,
};
use tracing::{error, info, warn};

use crate::agent::{AgentContext, AgentSummary, run_agent};
use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::profile::AgentProfile;
use crate::timing::TimingConfig;

/// A configured run, ready to execute.
pub struct Simulation {
    config: SimulationConfig,
    events: Arc<EventDispatcher>,
}

impl Simulation {
    /// Create a simulation from a validated configuration.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        for warning in config.warnings() {
            warn!(warning = %warning, "Questionable configuration");
        }
        Ok(Self {
            config,
            events: Arc::new(EventDispatcher::new()),
        })
    }

    /// Create a builder starting from the default configuration.
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// The configuration of this run.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Dispatcher receiving every station event of the run.
    pub fn event_dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Run every vehicle to completion.
    pub fn run(&self) -> Result<RunReport> {
        self.run_with_cancel(&CancelToken::new())
    }

    /// Run every vehicle until completion or until `cancel` fires.
    ///
    /// Cancellation wakes vehicles that are travelling, docked or queued;
    /// grants still held are rolled back. The report is produced either way.
    pub fn run_with_cancel(&self, cancel: &CancelToken) -> Result<RunReport> {
        let station = self.config.station_config();
        let facility = Facility::new(station.clone())?;
        let metrics = MetricsCollector::new();
        let profiles = self.config.profiles();

        info!(
            consumers = self.config.fleet.consumers,
            producers = self.config.fleet.producers,
            trips = self.config.fleet.trips,
            docks = station.docks,
            seed = ?self.config.seed,
            "Starting simulation"
        );
        metrics.record_start();

        let mut summaries = Vec::with_capacity(profiles.len());
        let mut failures = Vec::new();

        thread::scope(|s| {
            let mut handles = Vec::with_capacity(profiles.len());
            for (index, profile) in profiles.iter().enumerate() {
                let ctx = AgentContext {
                    facility: &facility,
                    events: &self.events,
                    metrics: &metrics,
                    cancel,
                    seed: self.config.seed.map(|seed| seed.wrapping_add(index as u64)),
                };
                let spawned = thread::Builder::new()
                    .name(profile.vehicle().to_string())
                    .spawn_scoped(s, move || run_agent(ctx, profile));
                match spawned {
                    Ok(handle) => handles.push((profile, handle)),
                    Err(e) => {
                        error!(vehicle = %profile.vehicle(), error = %e, "Failed to spawn vehicle");
                        // The station counts this vehicle as live until told otherwise.
                        let retired = match profile.population() {
                            Population::Consumers => facility.consumer_done(),
                            Population::Producers => facility.producer_done(),
                        };
                        if let Err(e) = retired {
                            warn!(error = %e, "Failed to retire unspawned vehicle");
                        }
                        failures.push(SimError::Io(e));
                    }
                }
            }

            for (profile, handle) in handles {
                match handle.join() {
                    Ok(summary) => summaries.push(summary),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(vehicle = %profile.vehicle(), message = %message, "Vehicle panicked");
                        failures.push(SimError::AgentPanicked(format!(
                            "{}: {}",
                            profile.vehicle(),
                            message
                        )));
                    }
                }
            }
        });

        metrics.record_end();

        if let Some(failure) = failures.into_iter().next() {
            return Err(failure);
        }

        let report = self.build_report(station, &facility, &metrics, summaries, cancel);
        info!(
            run_id = %report.run_id,
            levels = %report.station.ledger.levels,
            completed = report.count_ending(VehicleEnding::is_completed),
            aborted = report.count_ending(|e| *e == VehicleEnding::Aborted),
            "Simulation finished"
        );
        Ok(report)
    }

    fn build_report(
        &self,
        station: StationConfig,
        facility: &Facility,
        metrics: &MetricsCollector,
        summaries: Vec<AgentSummary>,
        cancel: &CancelToken,
    ) -> RunReport {
        let mut report = RunReport::new(station, facility.snapshot(), metrics.snapshot());
        for summary in summaries {
            report.add_outcome(VehicleOutcome::from(summary));
        }

        for warning in self.config.warnings() {
            report.add_warning(warning);
        }
        if cancel.is_cancelled() {
            report.add_warning("run cancelled before every vehicle finished");
        }

        let aborted = report.count_ending(|e| *e == VehicleEnding::Aborted);
        if aborted > 0 {
            report.add_info(format!(
                "{} vehicle(s) gave up after the station could no longer serve them",
                aborted
            ));
        }

        let failed = report.count_ending(|e| matches!(e, VehicleEnding::Failed { .. }));
        if failed > 0 {
            report.add_error(format!("{} vehicle(s) stopped on an error", failed));
        }

        let delta = report.conservation();
        if !delta.is_balanced() {
            report.add_error(format!(
                "conservation violated: nitrogen off by {}, quantum off by {}",
                delta.nitrogen, delta.quantum
            ));
        }
        if !report.station.is_consistent() {
            report.add_error("station ledger inconsistent after the run");
        }
        if report.station.waiting() > 0 {
            report.add_error(format!(
                "{} request(s) still queued after every vehicle finished",
                report.station.waiting()
            ));
        }

        report
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`Simulation`].
pub struct SimulationBuilder {
    config: SimulationConfig,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl SimulationBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::from_config(SimulationConfig::default())
    }

    /// Create a builder starting from `config`.
    pub fn from_config(config: SimulationConfig) -> Self {
        Self {
            config,
            subscribers: Vec::new(),
        }
    }

    /// Replace the station section.
    pub fn with_station(mut self, station: StationConfig) -> Self {
        self.config.station = station;
        self
    }

    /// Set the number of docking slots.
    pub fn with_docks(mut self, docks: u32) -> Self {
        self.config.station.docks = docks;
        self
    }

    /// Set the storage capacity.
    pub fn with_capacity(mut self, capacity: Amounts) -> Self {
        self.config.station.capacity = capacity;
        self
    }

    /// Set the stored amounts at start.
    pub fn with_initial_levels(mut self, levels: Amounts) -> Self {
        self.config.station.initial_levels = levels;
        self
    }

    /// Set the wake policy.
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.config.station.policy = policy;
        self
    }

    /// Set whether deposits occupy a slot.
    pub fn with_deposit_mode(mut self, mode: DepositMode) -> Self {
        self.config.station.deposit_mode = mode;
        self
    }

    /// Set the number of ordinary vehicles.
    pub fn with_consumers(mut self, consumers: u32) -> Self {
        self.config.fleet.consumers = consumers;
        self
    }

    /// Set the number of supply vehicles.
    pub fn with_producers(mut self, producers: u32) -> Self {
        self.config.fleet.producers = producers;
        self
    }

    /// Set the trips per vehicle.
    pub fn with_trips(mut self, trips: u32) -> Self {
        self.config.fleet.trips = trips;
        self
    }

    /// Set the amount withdrawn per refuel.
    pub fn with_refuel(mut self, amounts: Amounts) -> Self {
        self.config.fleet.refuel = amounts;
        self
    }

    /// Set the amount deposited per delivery.
    pub fn with_delivery(mut self, amounts: Amounts) -> Self {
        self.config.fleet.delivery = amounts;
        self
    }

    /// Set or clear the supply vehicles' return leg.
    pub fn with_return_leg(mut self, amounts: Option<Amounts>) -> Self {
        self.config.fleet.return_leg = amounts;
        self
    }

    /// Set the delays of ordinary vehicles.
    pub fn with_consumer_timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing.consumer = timing;
        self
    }

    /// Set the delays of supply vehicles.
    pub fn with_producer_timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing.producer = timing;
        self
    }

    /// Remove every delay.
    pub fn instant(mut self) -> Self {
        self.config.timing = crate::config::FleetTiming::instant();
        self
    }

    /// Seed every delay.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Add an event subscriber.
    pub fn with_event_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Build the simulation.
    pub fn build(self) -> Result<Simulation> {
        let simulation = Simulation::new(self.config)?;
        for subscriber in self.subscribers {
            simulation.events.subscribe(subscriber);
        }
        Ok(simulation)
    }
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a single profile on its own against `facility`.
///
/// Useful when driving a station by hand instead of through [`Simulation`].
pub fn run_standalone(
    facility: &Facility,
    profile: &AgentProfile,
    cancel: &CancelToken,
    seed: Option<u64>,
) -> VehicleOutcome {
    let events = EventDispatcher::new();
    let metrics = MetricsCollector::new();
    let ctx = AgentContext {
        facility,
        events: &events,
        metrics: &metrics,
        cancel,
        seed,
    };
    run_agent(ctx, profile).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::DelayRange;
    use std::time::Duration;
    use fuelbay_observe::CollectingSubscriber;

    fn instant() -> SimulationBuilder {
        Simulation::builder().instant().with_seed(1)
    }

    #[test]
    fn test_default_run_conserves() {
        let simulation = instant().build().unwrap();
        let report = simulation.run().unwrap();

        assert!(report.is_sound(), "{}", report.to_text());
        assert_eq!(report.vehicles.len(), 7);
        assert_eq!(report.station.live_consumers, 0);
        assert_eq!(report.station.live_producers, 0);
        assert_eq!(report.station.ledger.reserved_out, Amounts::ZERO);
        assert_eq!(report.station.ledger.reserved_in, Amounts::ZERO);
        assert_eq!(
            report.station.ledger.levels,
            Amounts::uniform(1_000)
                .saturating_add(report.metrics.deposited())
                .saturating_sub(report.metrics.withdrawn())
        );
        for vehicle in &report.vehicles {
            assert!(vehicle.trips_completed <= vehicle.trips_planned);
        }
    }

    #[test]
    fn test_consumers_abort_without_producers() {
        let report = instant()
            .with_producers(0)
            .with_consumers(3)
            .with_initial_levels(Amounts::uniform(250))
            .build()
            .unwrap()
            .run()
            .unwrap();

        assert!(report.is_sound(), "{}", report.to_text());
        let withdrawn = report.metrics.withdrawn();
        assert_eq!(withdrawn, Amounts::uniform(200));
        assert_eq!(report.station.ledger.levels, Amounts::uniform(50));
        assert!(report.count_ending(|e| *e == VehicleEnding::Aborted) >= 1);
    }

    #[test]
    fn test_producers_abort_when_storage_stays_full() {
        let report = instant()
            .with_consumers(0)
            .with_producers(2)
            .with_capacity(Amounts::uniform(1_000))
            .with_initial_levels(Amounts::ZERO)
            .with_return_leg(None)
            .build()
            .unwrap()
            .run()
            .unwrap();

        assert!(report.is_sound(), "{}", report.to_text());
        assert_eq!(report.station.ledger.levels, Amounts::uniform(600));
        assert_eq!(report.count_ending(|e| *e == VehicleEnding::Aborted), 2);
    }

    #[test]
    fn test_cancel_stops_run() {
        let simulation = Simulation::builder()
            .with_seed(5)
            .with_consumer_timing(TimingConfig {
                travel: DelayRange::fixed(5),
                service: DelayRange::fixed(60_000),
                turnaround: DelayRange::zero(),
            })
            .with_producer_timing(TimingConfig {
                travel: DelayRange::fixed(5),
                service: DelayRange::fixed(60_000),
                turnaround: DelayRange::zero(),
            })
            .with_initial_levels(Amounts::uniform(500))
            .build()
            .unwrap();

        let token = CancelToken::new();
        let report = thread::scope(|s| {
            let handle = s.spawn(|| simulation.run_with_cancel(&token));
            thread::sleep(Duration::from_millis(100));
            token.cancel();
            handle.join().unwrap()
        })
        .unwrap();

        assert!(report.count_ending(|e| *e == VehicleEnding::Cancelled) >= 1);
        assert_eq!(report.station.ledger.levels, Amounts::uniform(500));
        assert_eq!(report.station.ledger.reserved_out, Amounts::ZERO);
        assert_eq!(report.station.waiting(), 0);
        assert!(report.conservation().is_balanced());
        assert!(
            report
                .diagnostics
                .iter()
                .any(|d| d.message.contains("cancelled"))
        );
    }

    #[test]
    fn test_subscribers_see_every_settlement() {
        let collector = Arc::new(CollectingSubscriber::new(10_000));
        let simulation = instant()
            .with_event_subscriber(Arc::clone(&collector) as Arc<dyn EventSubscriber>)
            .build()
            .unwrap();
        let report = simulation.run().unwrap();

        let settled = collector.of_type("settled").len() as u64;
        assert_eq!(settled, report.station.counters.settlements);
        assert_eq!(collector.of_type("vehicle_retired").len(), 7);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = instant().with_refuel(Amounts::uniform(5_000)).build();
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_run_standalone() {
        let facility = Facility::new(
            StationConfig::minimal()
                .with_initial_levels(Amounts::uniform(30))
                .with_consumers(1),
        )
        .unwrap();
        let profile = AgentProfile::Consumer(crate::profile::ConsumerProfile {
            id: fuelbay_core::VehicleId::ordinary(1),
            amounts: Amounts::uniform(10),
            trips: 3,
            timing: TimingConfig::instant(),
        });

        let outcome = run_standalone(&facility, &profile, &CancelToken::new(), Some(9));
        assert!(outcome.ending.is_completed());
        assert_eq!(facility.levels(), Amounts::ZERO);
    }
}
