//! Vehicle loops.
//!
//! Each agent holds a [`PopulationGuard`](fuelbay_core::PopulationGuard) for
//! its whole run, so the station learns about its departure on every exit
//! path. A grant interrupted during service is released, never settled.

use fuelbay_core::{
    Admission, Amounts, CancelToken, Direction, Facility, Population, StationError, VehicleId,
};
use fuelbay_observe::{
    EventDispatcher, MetricsCollector, StationEvent, VehicleEnding, VehicleOutcome,
};
use tracing::{debug, warn};

use crate::profile::{AgentProfile, ConsumerProfile, ProducerProfile};
use crate::timing::Clock;

/// Everything an agent shares with the rest of the run.
#[derive(Clone, Copy)]
pub struct AgentContext<'a> {
    /// The station.
    pub facility: &'a Facility,
    /// Event sink.
    pub events: &'a EventDispatcher,
    /// Metrics sink.
    pub metrics: &'a MetricsCollector,
    /// Run-wide cancellation.
    pub cancel: &'a CancelToken,
    /// Seed for this agent's delays; entropy when `None`.
    pub seed: Option<u64>,
}

/// What one agent achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    /// The vehicle.
    pub vehicle: VehicleId,
    /// Planned trips.
    pub trips_planned: u32,
    /// Completed trips.
    pub trips_completed: u32,
    /// How the run ended.
    pub ending: VehicleEnding,
    /// Total withdrawn.
    pub withdrawn: Amounts,
    /// Total deposited.
    pub deposited: Amounts,
}

impl AgentSummary {
    fn new(vehicle: VehicleId, trips_planned: u32) -> Self {
        Self {
            vehicle,
            trips_planned,
            trips_completed: 0,
            ending: VehicleEnding::Completed,
            withdrawn: Amounts::ZERO,
            deposited: Amounts::ZERO,
        }
    }

    /// Check whether a request was aborted.
    pub fn was_aborted(&self) -> bool {
        self.ending == VehicleEnding::Aborted
    }

    /// Check whether the run was cancelled under this agent.
    pub fn was_cancelled(&self) -> bool {
        self.ending == VehicleEnding::Cancelled
    }
}

impl From<AgentSummary> for VehicleOutcome {
    fn from(summary: AgentSummary) -> Self {
        VehicleOutcome {
            vehicle: summary.vehicle,
            trips_planned: summary.trips_planned,
            trips_completed: summary.trips_completed,
            ending: summary.ending,
            withdrawn: summary.withdrawn,
            deposited: summary.deposited,
        }
    }
}

/// Result of one visit to the station.
enum Visit {
    Settled(Amounts),
    Stopped(VehicleEnding),
}

#[derive(Clone, Copy)]
enum Leg {
    Refuel,
    Delivery,
    Return,
}

/// Run any agent to completion.
pub fn run_agent(ctx: AgentContext<'_>, profile: &AgentProfile) -> AgentSummary {
    match profile {
        AgentProfile::Consumer(profile) => run_consumer(ctx, profile),
        AgentProfile::Producer(profile) => run_producer(ctx, profile),
    }
}

/// Run an ordinary vehicle: travel, refuel, repeat.
pub fn run_consumer(ctx: AgentContext<'_>, profile: &ConsumerProfile) -> AgentSummary {
    let guard = ctx.facility.consumer_guard();
    let mut clock = Clock::new(profile.timing, ctx.seed, ctx.cancel.clone());
    let mut summary = AgentSummary::new(profile.id, profile.trips);

    for _ in 0..profile.trips {
        if clock.travel().is_err() {
            summary.ending = VehicleEnding::Cancelled;
            break;
        }
        match visit(ctx, &mut clock, profile.id, Leg::Refuel, profile.amounts) {
            Visit::Settled(amounts) => {
                summary.withdrawn = summary.withdrawn.saturating_add(amounts);
                summary.trips_completed += 1;
                ctx.metrics.record_trip(profile.id);
            }
            Visit::Stopped(ending) => {
                summary.ending = ending;
                break;
            }
        }
    }

    finish(ctx, guard.retire(), Population::Consumers, &summary);
    summary
}

/// Run a supply vehicle: travel, deposit, optionally refuel for the way
/// back, repeat.
pub fn run_producer(ctx: AgentContext<'_>, profile: &ProducerProfile) -> AgentSummary {
    let guard = ctx.facility.producer_guard();
    let mut clock = Clock::new(profile.timing, ctx.seed, ctx.cancel.clone());
    let mut summary = AgentSummary::new(profile.id, profile.trips);

    'trips: for _ in 0..profile.trips {
        if clock.travel().is_err() {
            summary.ending = VehicleEnding::Cancelled;
            break;
        }
        match visit(ctx, &mut clock, profile.id, Leg::Delivery, profile.delivery) {
            Visit::Settled(amounts) => {
                summary.deposited = summary.deposited.saturating_add(amounts);
            }
            Visit::Stopped(ending) => {
                summary.ending = ending;
                break;
            }
        }

        if let Some(return_leg) = profile.return_leg {
            if clock.turnaround().is_err() {
                summary.ending = VehicleEnding::Cancelled;
                break;
            }
            match visit(ctx, &mut clock, profile.id, Leg::Return, return_leg) {
                Visit::Settled(amounts) => {
                    summary.withdrawn = summary.withdrawn.saturating_add(amounts);
                }
                Visit::Stopped(ending) => {
                    summary.ending = ending;
                    break 'trips;
                }
            }
        }

        summary.trips_completed += 1;
        ctx.metrics.record_trip(profile.id);
    }

    finish(ctx, guard.retire(), Population::Producers, &summary);
    summary
}

fn visit(
    ctx: AgentContext<'_>,
    clock: &mut Clock,
    vehicle: VehicleId,
    leg: Leg,
    amounts: Amounts,
) -> Visit {
    let direction = match leg {
        Leg::Delivery => Direction::Supply,
        Leg::Refuel | Leg::Return => Direction::Consume,
    };
    ctx.events.emit(StationEvent::VehicleArrived {
        vehicle,
        direction,
        amounts,
    });

    let admission = match leg {
        Leg::Refuel => ctx.facility.acquire_cancellable(vehicle, amounts, ctx.cancel),
        Leg::Delivery => ctx.facility.deposit_cancellable(vehicle, amounts, ctx.cancel),
        Leg::Return => ctx.facility.acquire_return_leg(vehicle, amounts, ctx.cancel),
    };

    let reservation = match admission {
        Ok(Admission::Granted(reservation)) => reservation,
        Ok(Admission::Aborted) => {
            ctx.metrics.record_abort(vehicle, direction);
            ctx.events.emit(StationEvent::Aborted { vehicle, direction });
            return Visit::Stopped(VehicleEnding::Aborted);
        }
        Err(StationError::Cancelled { .. }) => {
            ctx.metrics.record_cancel(vehicle, direction);
            ctx.events.emit(StationEvent::Cancelled { vehicle, direction });
            return Visit::Stopped(VehicleEnding::Cancelled);
        }
        Err(e) => {
            warn!(vehicle = %vehicle, error = %e, "Request rejected");
            ctx.events.emit(StationEvent::Error {
                message: format!("{}: {}", vehicle, e),
            });
            return Visit::Stopped(VehicleEnding::Failed {
                message: e.to_string(),
            });
        }
    };

    ctx.metrics.record_grant(vehicle, direction, reservation.waited());
    ctx.events.emit(StationEvent::Granted {
        vehicle,
        direction,
        amounts,
        waited: reservation.waited(),
    });

    if clock.service().is_err() {
        reservation.release();
        ctx.metrics.record_cancel(vehicle, direction);
        ctx.events.emit(StationEvent::Cancelled { vehicle, direction });
        return Visit::Stopped(VehicleEnding::Cancelled);
    }

    let levels = reservation.settle();
    ctx.metrics.record_settle(vehicle, direction, amounts);
    ctx.events.emit(StationEvent::Settled {
        vehicle,
        direction,
        amounts,
        levels,
    });
    Visit::Settled(amounts)
}

fn finish(
    ctx: AgentContext<'_>,
    retired: fuelbay_core::StationResult<u64>,
    population: Population,
    summary: &AgentSummary,
) {
    match retired {
        Ok(remaining) => debug!(
            vehicle = %summary.vehicle,
            population = %population,
            remaining,
            ending = %summary.ending,
            "Vehicle finished"
        ),
        Err(e) => warn!(vehicle = %summary.vehicle, error = %e, "Failed to retire vehicle"),
    }
    ctx.events.emit(StationEvent::VehicleRetired {
        vehicle: summary.vehicle,
        population,
        trips: summary.trips_completed,
    });
}
