//! The admission monitor.
//!
//! A [`Facility`] serializes every state transition of one station behind a
//! single lock. Requests that cannot be served on arrival are queued per
//! direction and block on their own condition variable; the monitor signals
//! exactly the requests it grants or aborts.
//!
//! # Wake policy
//!
//! After every change to levels, reservations or slots the monitor scans the
//! supply queue, then the consume queue, from head to tail. Under
//! [`AdmissionPolicy::StrictFifo`] a scan stops at the first entry it cannot
//! grant; under [`AdmissionPolicy::ScanThrough`] it skips that entry. A scan of
//! a slot-bearing queue also stops as soon as no slot is free. The pass ends by
//! aborting queued entries whose relieving population is gone and whose need
//! the stock (or space) cannot cover.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::cancel::{CancelToken, CancelWaker};
use crate::config::{AdmissionPolicy, StationConfig};
use crate::error::{StationError, StationResult};
use crate::ledger::{Hold, Ledger, LedgerSnapshot};
use crate::lifecycle::{LifecycleTracker, Population, PopulationGuard};
use crate::request::{PendingRequest, Ticket, Verdict, WaitQueue};
use crate::types::{Amounts, Direction, Resource, VehicleId};

/// Scan order of the wake policy.
const SCAN_ORDER: [Direction; 2] = [Direction::Supply, Direction::Consume];

/// Running totals kept by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCounters {
    /// Requests granted on arrival.
    pub immediate_grants: u64,
    /// Requests granted by the wake policy after queueing.
    pub queued_grants: u64,
    /// Requests aborted, on arrival or from a queue.
    pub aborts: u64,
    /// Queued requests whose owner cancelled the wait.
    pub cancellations: u64,
    /// Grants committed by settlement.
    pub settlements: u64,
    /// Grants rolled back without settlement.
    pub rollbacks: u64,
}

impl StationCounters {
    /// Total grants of both kinds.
    pub fn grants(&self) -> u64 {
        self.immediate_grants + self.queued_grants
    }

    /// Grants neither settled nor rolled back yet.
    pub fn outstanding(&self) -> u64 {
        self.grants()
            .saturating_sub(self.settlements + self.rollbacks)
    }
}

/// Consistent copy of the whole station state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSnapshot {
    /// Ledger view.
    pub ledger: LedgerSnapshot,
    /// Live consumers.
    pub live_consumers: u64,
    /// Live producers.
    pub live_producers: u64,
    /// Requests waiting in the consume queue.
    pub consume_waiting: usize,
    /// Requests waiting in the supply queue.
    pub supply_waiting: usize,
    /// Running totals.
    pub counters: StationCounters,
}

impl StationSnapshot {
    /// Check every state invariant.
    pub fn is_consistent(&self) -> bool {
        self.ledger.is_consistent()
    }

    /// Requests waiting in both queues.
    pub fn waiting(&self) -> usize {
        self.consume_waiting + self.supply_waiting
    }
}

/// Outcome of an admission request.
#[must_use = "a granted reservation rolls back as soon as it is dropped"]
#[derive(Debug)]
pub enum Admission<'a> {
    /// Resources (and a slot) are reserved for the caller.
    Granted(Reservation<'a>),
    /// The request can never be served; the caller should give up.
    Aborted,
}

impl<'a> Admission<'a> {
    /// Check whether the request was granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }

    /// Check whether the request was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Admission::Aborted)
    }

    /// Take the reservation out of a grant.
    pub fn into_reservation(self) -> Option<Reservation<'a>> {
        match self {
            Admission::Granted(reservation) => Some(reservation),
            Admission::Aborted => None,
        }
    }
}

/// A granted request that has not been settled yet.
///
/// Settling commits the reserved amounts to the levels and frees the slot.
/// Dropping an unsettled reservation rolls it back: the reservation and slot
/// are returned and the levels stay untouched.
#[must_use = "dropping a reservation rolls it back"]
pub struct Reservation<'a> {
    facility: &'a Facility,
    vehicle: VehicleId,
    hold: Hold,
    waited: Duration,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(facility: &'a Facility, vehicle: VehicleId, hold: Hold, waited: Duration) -> Self {
        Self {
            facility,
            vehicle,
            hold,
            waited,
            armed: true,
        }
    }

    /// Vehicle the reservation belongs to.
    pub fn vehicle(&self) -> VehicleId {
        self.vehicle
    }

    /// Direction of the reservation.
    pub fn direction(&self) -> Direction {
        self.hold.direction
    }

    /// Reserved amounts.
    pub fn amounts(&self) -> Amounts {
        self.hold.amounts
    }

    /// Check whether the reservation occupies a docking slot.
    pub fn is_docked(&self) -> bool {
        self.hold.docked
    }

    /// Time spent queued before the grant. Zero for immediate grants.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Commit the reservation, returning the stored levels afterwards.
    pub fn settle(mut self) -> Amounts {
        self.armed = false;
        self.facility.commit(self.vehicle, &self.hold)
    }

    /// Give the reservation back without moving any resources.
    pub fn release(mut self) {
        self.armed = false;
        self.facility.rollback(self.vehicle, &self.hold);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.facility.rollback(self.vehicle, &self.hold);
        }
    }
}

impl std::fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("vehicle", &self.vehicle)
            .field("hold", &self.hold)
            .field("waited", &self.waited)
            .finish()
    }
}

/// State guarded by the monitor lock.
struct StationState {
    ledger: Ledger,
    lifecycle: LifecycleTracker,
    consume_queue: WaitQueue,
    supply_queue: WaitQueue,
    verdicts: HashMap<Ticket, Verdict>,
    next_ticket: Ticket,
    counters: StationCounters,
}

impl StationState {
    fn queue(&self, direction: Direction) -> &WaitQueue {
        match direction {
            Direction::Consume => &self.consume_queue,
            Direction::Supply => &self.supply_queue,
        }
    }

    fn queue_mut(&mut self, direction: Direction) -> &mut WaitQueue {
        match direction {
            Direction::Consume => &mut self.consume_queue,
            Direction::Supply => &mut self.supply_queue,
        }
    }

    /// Check whether no member of the relieving population is free to act.
    ///
    /// Members waiting in the dependent queue themselves do not count, nor
    /// does an arriving one.
    fn is_stranded(&self, direction: Direction, arriving_reliever: bool) -> bool {
        let waiting = self
            .queue(direction)
            .iter()
            .filter(|request| request.from_reliever)
            .count() as u64;
        self.lifecycle
            .is_stranded(direction, waiting + u64::from(arriving_reliever))
    }

    /// Record a verdict for a request already removed from its queue and wake it.
    fn resolve(&mut self, request: PendingRequest, verdict: Verdict) {
        self.verdicts.insert(request.ticket, verdict);
        match verdict {
            Verdict::Granted => self.counters.queued_grants += 1,
            Verdict::Aborted => self.counters.aborts += 1,
        }
        request.signal.notify_one();
    }

    fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            ledger: self.ledger.snapshot(),
            live_consumers: self.lifecycle.live(Population::Consumers),
            live_producers: self.lifecycle.live(Population::Producers),
            consume_waiting: self.consume_queue.len(),
            supply_waiting: self.supply_queue.len(),
            counters: self.counters,
        }
    }
}

/// Signals one queued request when its cancel token fires.
struct QueuedWaker {
    state: Weak<Mutex<StationState>>,
    signal: Arc<Condvar>,
}

impl CancelWaker for QueuedWaker {
    fn wake(&self) {
        if let Some(state) = self.state.upgrade() {
            let _state = state.lock();
            self.signal.notify_one();
        }
    }
}

/// Shared handle to a facility.
pub type SharedFacility = Arc<Facility>;

/// Trait for converting a facility into a shared handle.
pub trait IntoShared {
    /// Wrap in an `Arc`.
    fn into_shared(self) -> SharedFacility;
}

impl IntoShared for Facility {
    fn into_shared(self) -> SharedFacility {
        Arc::new(self)
    }
}

/// The station: docking slots and two resources behind one monitor.
///
/// # Example
///
/// ```
/// use fuelbay_core::{Amounts, Facility, StationConfig, VehicleId};
///
/// let facility = Facility::new(
///     StationConfig::minimal()
///         .with_initial_levels(Amounts::uniform(50))
///         .with_producers(1),
/// )
/// .unwrap();
///
/// let admission = facility.acquire(VehicleId::ordinary(1), Amounts::uniform(20)).unwrap();
/// let reservation = admission.into_reservation().unwrap();
/// assert_eq!(reservation.settle(), Amounts::uniform(30));
/// ```
pub struct Facility {
    config: StationConfig,
    state: Arc<Mutex<StationState>>,
}

impl Facility {
    /// Create a facility from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::InvalidConfig`] if the initial levels do not
    /// fit the capacity.
    pub fn new(config: StationConfig) -> StationResult<Self> {
        config.validate()?;

        let state = StationState {
            ledger: Ledger::new(config.capacity, config.initial_levels, config.docks),
            lifecycle: LifecycleTracker::new(config.consumers, config.producers),
            consume_queue: WaitQueue::new(),
            supply_queue: WaitQueue::new(),
            verdicts: HashMap::new(),
            next_ticket: 0,
            counters: StationCounters::default(),
        };

        info!(
            docks = config.docks,
            capacity = %config.capacity,
            levels = %config.initial_levels,
            consumers = config.consumers,
            producers = config.producers,
            policy = ?config.policy,
            deposit_mode = ?config.deposit_mode,
            "Created station"
        );

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Create an empty facility from slot count, capacity and live counts.
    pub fn with_counts(
        total_slots: u32,
        capacity: Amounts,
        initial_consumers: u64,
        initial_producers: u64,
    ) -> Self {
        let config = StationConfig::new()
            .with_docks(total_slots)
            .with_capacity(capacity)
            .with_consumers(initial_consumers)
            .with_producers(initial_producers);
        let state = StationState {
            ledger: Ledger::new(capacity, Amounts::ZERO, total_slots),
            lifecycle: LifecycleTracker::new(initial_consumers, initial_producers),
            consume_queue: WaitQueue::new(),
            supply_queue: WaitQueue::new(),
            verdicts: HashMap::new(),
            next_ticket: 0,
            counters: StationCounters::default(),
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// The configuration this facility was built from.
    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Currently stored amounts.
    pub fn levels(&self) -> Amounts {
        self.state.lock().ledger.levels()
    }

    /// Currently unoccupied docking slots.
    pub fn free_slots(&self) -> u32 {
        self.state.lock().ledger.free_slots()
    }

    /// Take a consistent copy of the station state.
    pub fn snapshot(&self) -> StationSnapshot {
        self.state.lock().snapshot()
    }

    /// Reserve a slot and `amounts` of stock for a withdrawal.
    ///
    /// Blocks while the request is queued. Returns [`Admission::Aborted`] when
    /// no producer is left to restock the station.
    ///
    /// # Errors
    ///
    /// Returns a configuration fault if `amounts` can never fit the station.
    pub fn acquire(&self, vehicle: VehicleId, amounts: Amounts) -> StationResult<Admission<'_>> {
        self.admit(Direction::Consume, vehicle, amounts, None, false)
    }

    /// Like [`Facility::acquire`], giving up when `token` is cancelled.
    pub fn acquire_cancellable(
        &self,
        vehicle: VehicleId,
        amounts: Amounts,
        token: &CancelToken,
    ) -> StationResult<Admission<'_>> {
        self.admit(Direction::Consume, vehicle, amounts, Some(token), false)
    }

    /// Reserve stock for a producer's own return leg.
    ///
    /// Behaves like [`Facility::acquire_cancellable`], except that the waiting
    /// producer no longer counts as able to restock. Once every live producer
    /// waits on a return leg, withdrawals the stock cannot cover are aborted
    /// instead of blocking forever.
    pub fn acquire_return_leg(
        &self,
        vehicle: VehicleId,
        amounts: Amounts,
        token: &CancelToken,
    ) -> StationResult<Admission<'_>> {
        self.admit(Direction::Consume, vehicle, amounts, Some(token), true)
    }

    /// Reserve storage space (and a slot in docked mode) for a deposit.
    ///
    /// Blocks while the request is queued. Returns [`Admission::Aborted`] when
    /// no consumer is left to make room.
    pub fn deposit(&self, vehicle: VehicleId, amounts: Amounts) -> StationResult<Admission<'_>> {
        self.admit(Direction::Supply, vehicle, amounts, None, false)
    }

    /// Like [`Facility::deposit`], giving up when `token` is cancelled.
    pub fn deposit_cancellable(
        &self,
        vehicle: VehicleId,
        amounts: Amounts,
        token: &CancelToken,
    ) -> StationResult<Admission<'_>> {
        self.admit(Direction::Supply, vehicle, amounts, Some(token), false)
    }

    /// Settle a reservation of either direction.
    ///
    /// Same as [`Reservation::settle`]; the reservation is settled against the
    /// facility that granted it.
    pub fn settle(&self, reservation: Reservation<'_>) -> Amounts {
        debug_assert!(std::ptr::eq(reservation.facility, self));
        reservation.settle()
    }

    /// Retire one consumer, returning how many remain.
    ///
    /// When the last consumer leaves, every queued deposit is aborted.
    pub fn consumer_done(&self) -> StationResult<u64> {
        self.retire(Population::Consumers)
    }

    /// Retire one producer, returning how many remain.
    ///
    /// When the last producer leaves, every queued withdrawal is aborted.
    pub fn producer_done(&self) -> StationResult<u64> {
        self.retire(Population::Producers)
    }

    /// Add a consumer that joined after construction.
    pub fn register_consumer(&self) -> u64 {
        self.register(Population::Consumers)
    }

    /// Add a producer that joined after construction.
    pub fn register_producer(&self) -> u64 {
        self.register(Population::Producers)
    }

    /// Guard that retires one of the consumers counted at construction.
    pub fn consumer_guard(&self) -> PopulationGuard<'_> {
        PopulationGuard::new(self, Population::Consumers)
    }

    /// Guard that retires one of the producers counted at construction.
    pub fn producer_guard(&self) -> PopulationGuard<'_> {
        PopulationGuard::new(self, Population::Producers)
    }

    /// Register a new member of `population` and guard its retirement.
    pub fn register_guard(&self, population: Population) -> PopulationGuard<'_> {
        self.register(population);
        PopulationGuard::new(self, population)
    }

    /// Cancel `token`, returning how many requests were queued here with it.
    ///
    /// Same as [`CancelToken::cancel`]; each of those requests leaves its
    /// queue and reports [`StationError::Cancelled`].
    pub fn cancel(&self, token: &CancelToken) -> usize {
        let queued = {
            let state = self.state.lock();
            state
                .supply_queue
                .iter()
                .chain(state.consume_queue.iter())
                .filter(|request| request.waits_with(token))
                .count()
        };

        if token.cancel() {
            debug!(queued, "Cancelled token");
        }
        queued
    }

    fn register(&self, population: Population) -> u64 {
        let live = self.state.lock().lifecycle.register(population);
        debug!(population = %population, live, "Registered population member");
        live
    }

    pub(crate) fn retire(&self, population: Population) -> StationResult<u64> {
        let mut state = self.state.lock();
        let remaining = state.lifecycle.retire(population)?;
        debug!(population = %population, remaining, "Retired population member");

        if state.lifecycle.is_exhausted(population) {
            let direction = population.dependent_queue();
            let stranded = state.queue_mut(direction).drain_all();
            info!(
                population = %population,
                aborted = stranded.len(),
                "Population exhausted"
            );
            for request in stranded {
                warn!(
                    vehicle = %request.vehicle,
                    direction = %direction,
                    "Aborting queued request: no {population} remain"
                );
                state.resolve(request, Verdict::Aborted);
            }
        }
        self.wake_waiters(&mut state);

        Ok(remaining)
    }

    fn uses_slot(&self, direction: Direction) -> bool {
        match direction {
            Direction::Consume => true,
            Direction::Supply => self.config.deposit_mode.uses_slot(),
        }
    }

    fn check_request(&self, direction: Direction, amounts: Amounts) -> StationResult<()> {
        for resource in [Resource::Nitrogen, Resource::Quantum] {
            let requested = amounts.get(resource);
            let capacity = self.config.capacity.get(resource);
            if requested > capacity {
                return Err(StationError::AmountExceedsCapacity {
                    resource,
                    requested,
                    capacity,
                });
            }
        }
        if self.uses_slot(direction) && self.config.docks == 0 {
            return Err(StationError::NoDocks);
        }
        Ok(())
    }

    fn admit(
        &self,
        direction: Direction,
        vehicle: VehicleId,
        amounts: Amounts,
        token: Option<&CancelToken>,
        from_reliever: bool,
    ) -> StationResult<Admission<'_>> {
        self.check_request(direction, amounts)?;
        if token.is_some_and(CancelToken::is_cancelled) {
            return Err(StationError::Cancelled { vehicle });
        }

        let hold = Hold {
            direction,
            amounts,
            docked: self.uses_slot(direction),
        };

        let mut state = self.state.lock();
        debug!(
            vehicle = %vehicle,
            direction = %direction,
            amounts = %amounts,
            "Vehicle arrived"
        );

        if state.queue(direction).is_empty() && state.ledger.can_hold(&hold) {
            state.ledger.reserve(&hold);
            state.counters.immediate_grants += 1;
            debug!(
                vehicle = %vehicle,
                direction = %direction,
                free_slots = state.ledger.free_slots(),
                "Granted on arrival"
            );
            return Ok(Admission::Granted(Reservation::new(
                self,
                vehicle,
                hold,
                Duration::ZERO,
            )));
        }

        if state.is_stranded(direction, from_reliever) && !state.ledger.resources_for(&hold) {
            state.counters.aborts += 1;
            warn!(
                vehicle = %vehicle,
                direction = %direction,
                amounts = %amounts,
                "Aborted on arrival: request cannot be met and no relief remains"
            );
            return Ok(Admission::Aborted);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let signal = Arc::new(Condvar::new());
        let enqueued_at = Instant::now();
        let position = state.queue_mut(direction).push(PendingRequest {
            ticket,
            vehicle,
            hold,
            signal: Arc::clone(&signal),
            cancel: token.cloned(),
            from_reliever,
            enqueued_at,
        });
        debug!(vehicle = %vehicle, direction = %direction, position, "Queued");

        // Registered before the first flag check below.
        let registration = token.map(|token| {
            let waker = Arc::new(QueuedWaker {
                state: Arc::downgrade(&self.state),
                signal: Arc::clone(&signal),
            });
            (token, token.register(waker))
        });

        if from_reliever {
            self.wake_waiters(&mut state);
        }

        let outcome = loop {
            if let Some(verdict) = state.verdicts.remove(&ticket) {
                break Ok(match verdict {
                    Verdict::Granted => {
                        let waited = enqueued_at.elapsed();
                        debug!(
                            vehicle = %vehicle,
                            direction = %direction,
                            waited_ms = waited.as_millis(),
                            "Granted from queue"
                        );
                        Admission::Granted(Reservation::new(self, vehicle, hold, waited))
                    }
                    Verdict::Aborted => {
                        warn!(vehicle = %vehicle, direction = %direction, "Aborted from queue");
                        Admission::Aborted
                    }
                });
            }

            if token.is_some_and(CancelToken::is_cancelled) {
                state.queue_mut(direction).remove_ticket(ticket);
                state.counters.cancellations += 1;
                warn!(vehicle = %vehicle, direction = %direction, "Wait cancelled");
                self.wake_waiters(&mut state);
                break Err(StationError::Cancelled { vehicle });
            }

            signal.wait(&mut state);
        };

        if let Some((token, key)) = registration {
            token.deregister(key);
        }
        outcome
    }

    fn commit(&self, vehicle: VehicleId, hold: &Hold) -> Amounts {
        let mut state = self.state.lock();
        state.ledger.commit(hold);
        state.counters.settlements += 1;
        let levels = state.ledger.levels();
        debug!(
            vehicle = %vehicle,
            direction = %hold.direction,
            amounts = %hold.amounts,
            levels = %levels,
            "Settled"
        );
        self.wake_waiters(&mut state);
        levels
    }

    fn rollback(&self, vehicle: VehicleId, hold: &Hold) {
        let mut state = self.state.lock();
        state.ledger.rollback(hold);
        state.counters.rollbacks += 1;
        warn!(
            vehicle = %vehicle,
            direction = %hold.direction,
            amounts = %hold.amounts,
            "Reservation rolled back"
        );
        self.wake_waiters(&mut state);
    }

    /// Run the wake policy. Must be called with the lock held.
    ///
    /// Aborting a stranded head can unblock the entries behind it, so scans
    /// repeat until a sweep aborts nothing.
    fn wake_waiters(&self, state: &mut StationState) {
        loop {
            for direction in SCAN_ORDER {
                self.scan_queue(state, direction);
            }
            if self.abort_stranded(state) == 0 {
                break;
            }
        }
        debug_assert!(state.ledger.snapshot().is_consistent());
    }

    fn scan_queue(&self, state: &mut StationState, direction: Direction) {
        let mut index = 0;
        while let Some(request) = state.queue(direction).get(index) {
            let hold = request.hold;
            if hold.docked && !state.ledger.has_free_slot() {
                break;
            }

            if state.ledger.can_hold(&hold) {
                let Some(request) = state.queue_mut(direction).remove_at(index) else {
                    break;
                };
                state.ledger.reserve(&hold);
                trace!(
                    vehicle = %request.vehicle,
                    direction = %direction,
                    queued_ms = request.enqueued_at.elapsed().as_millis(),
                    "Wake pass granted request"
                );
                state.resolve(request, Verdict::Granted);
                continue;
            }

            match self.config.policy {
                AdmissionPolicy::StrictFifo => break,
                AdmissionPolicy::ScanThrough => index += 1,
            }
        }
    }

    fn abort_stranded(&self, state: &mut StationState) -> usize {
        let mut aborted = 0;
        for direction in SCAN_ORDER {
            if state.queue(direction).is_empty() || !state.is_stranded(direction, false) {
                continue;
            }
            let ledger = state.ledger.clone();
            let stranded = state
                .queue_mut(direction)
                .remove_where(|request| !ledger.resources_for(&request.hold));
            aborted += stranded.len();
            for request in stranded {
                warn!(
                    vehicle = %request.vehicle,
                    direction = %direction,
                    "Aborting queued request: it can no longer be met"
                );
                state.resolve(request, Verdict::Aborted);
            }
        }
        aborted
    }
}

impl std::fmt::Debug for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facility")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepositMode;
    use std::sync::mpsc;
    use std::thread;

    fn wait_until(facility: &Facility, condition: impl Fn(&StationSnapshot) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if condition(&facility.snapshot()) {
                return;
            }
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn station(docks: u32, levels: u64, consumers: u64, producers: u64) -> Facility {
        Facility::new(
            StationConfig::new()
                .with_docks(docks)
                .with_capacity(Amounts::uniform(100))
                .with_initial_levels(Amounts::uniform(levels))
                .with_consumers(consumers)
                .with_producers(producers),
        )
        .unwrap()
    }

    #[test]
    fn test_immediate_grant_and_settle() {
        let facility = station(2, 50, 1, 1);

        let reservation = facility
            .acquire(VehicleId::ordinary(1), Amounts::new(20, 10))
            .unwrap()
            .into_reservation()
            .unwrap();
        assert_eq!(reservation.waited(), Duration::ZERO);

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.ledger.free_slots, 1);
        assert_eq!(snapshot.ledger.reserved_out, Amounts::new(20, 10));
        assert_eq!(snapshot.ledger.levels, Amounts::uniform(50));

        assert_eq!(facility.settle(reservation), Amounts::new(30, 40));
        let snapshot = facility.snapshot();
        assert_eq!(snapshot.ledger.free_slots, 2);
        assert_eq!(snapshot.ledger.reserved_out, Amounts::ZERO);
        assert_eq!(snapshot.counters.settlements, 1);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_deposit_then_withdraw_then_abort() {
        let facility = Facility::with_counts(1, Amounts::uniform(100), 0, 0);

        let deposit = facility
            .deposit(VehicleId::supply(1), Amounts::uniform(60))
            .unwrap();
        assert!(deposit.is_granted());
        deposit.into_reservation().unwrap().settle();

        let refuel = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(60))
            .unwrap();
        assert!(refuel.is_granted());
        assert_eq!(refuel.into_reservation().unwrap().settle(), Amounts::ZERO);

        let late = facility
            .acquire(VehicleId::ordinary(2), Amounts::uniform(10))
            .unwrap();
        assert!(late.is_aborted());
        assert_eq!(facility.snapshot().counters.aborts, 1);
    }

    #[test]
    fn test_second_consumer_waits_for_settle() {
        // Two slots, but the stock does not cover both withdrawals at once.
        let facility = station(2, 100, 2, 1);
        let reservation = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(70))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let second = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(2), Amounts::uniform(50))
                    .unwrap()
                    .into_reservation()
                    .map(Reservation::settle)
            });

            wait_until(&facility, |snap| snap.consume_waiting == 1);
            assert_eq!(facility.free_slots(), 1);

            assert_eq!(reservation.settle(), Amounts::uniform(30));
            let snapshot = facility.snapshot();
            assert_eq!(snapshot.ledger.free_slots, 2);
            assert_eq!(snapshot.consume_waiting, 1);

            // The producer leaving strands it for good.
            facility.producer_done().unwrap();
            assert_eq!(second.join().unwrap(), None);
        });

        assert_eq!(facility.snapshot().counters.aborts, 1);
    }

    #[test]
    fn test_queued_consumer_granted_after_restock() {
        let facility = station(2, 100, 2, 1);
        let reservation = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(70))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let second = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(2), Amounts::uniform(50))
                    .unwrap()
                    .into_reservation()
                    .map(|r| (r.waited() > Duration::ZERO, r.settle()))
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            reservation.settle();
            facility
                .deposit(VehicleId::supply(1), Amounts::uniform(20))
                .unwrap()
                .into_reservation()
                .unwrap()
                .settle();

            assert_eq!(second.join().unwrap(), Some((true, Amounts::ZERO)));
        });

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.counters.queued_grants, 1);
        assert_eq!(snapshot.counters.immediate_grants, 2);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_strict_fifo_never_overtakes_head() {
        let facility = station(3, 30, 3, 1);
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let requests = [(1, 50), (2, 10), (3, 10)];
            for (number, units) in requests {
                let tx = tx.clone();
                let facility = &facility;
                s.spawn(move || {
                    let admission = facility
                        .acquire(VehicleId::ordinary(number), Amounts::uniform(units))
                        .unwrap();
                    if let Some(reservation) = admission.into_reservation() {
                        tx.send(number).unwrap();
                        reservation.settle();
                    }
                });
                wait_until(&facility, |snap| snap.consume_waiting == number as usize);
            }

            // Not enough for the head: nobody may be served.
            facility
                .deposit(VehicleId::supply(1), Amounts::uniform(5))
                .unwrap()
                .into_reservation()
                .unwrap()
                .settle();
            assert_eq!(facility.snapshot().consume_waiting, 3);
            assert!(rx.try_recv().is_err());

            // Enough for the head only.
            facility
                .deposit(VehicleId::supply(1), Amounts::uniform(20))
                .unwrap()
                .into_reservation()
                .unwrap()
                .settle();
            assert_eq!(rx.recv().unwrap(), 1);
            wait_until(&facility, |snap| snap.counters.settlements == 3);
            assert_eq!(facility.snapshot().consume_waiting, 2);

            // Enough for both followers.
            facility
                .deposit(VehicleId::supply(1), Amounts::uniform(15))
                .unwrap()
                .into_reservation()
                .unwrap()
                .settle();
        });

        let mut rest: Vec<u32> = rx.try_iter().collect();
        rest.sort();
        assert_eq!(rest, vec![2, 3]);
        assert_eq!(facility.levels(), Amounts::ZERO);
        assert!(facility.snapshot().is_consistent());
    }

    #[test]
    fn test_scan_through_serves_satisfiable_tail() {
        let facility = Facility::new(
            StationConfig::new()
                .with_docks(3)
                .with_capacity(Amounts::uniform(100))
                .with_initial_levels(Amounts::uniform(30))
                .with_consumers(3)
                .with_producers(1)
                .with_policy(AdmissionPolicy::ScanThrough),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            for (number, units) in [(1, 50), (2, 10), (3, 10)] {
                let tx = tx.clone();
                let facility = &facility;
                s.spawn(move || {
                    let admission = facility
                        .acquire(VehicleId::ordinary(number), Amounts::uniform(units))
                        .unwrap();
                    tx.send((number, admission.is_granted())).unwrap();
                });
                wait_until(&facility, |snap| snap.consume_waiting == number as usize);
            }

            // Any change runs the wake pass; the head is skipped.
            facility
                .deposit(VehicleId::supply(1), Amounts::uniform(1))
                .unwrap()
                .into_reservation()
                .unwrap()
                .settle();
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            facility.producer_done().unwrap();
        });

        let mut outcomes: Vec<(u32, bool)> = rx.try_iter().collect();
        outcomes.sort();
        assert_eq!(outcomes, vec![(1, false), (2, true), (3, true)]);
    }

    #[test]
    fn test_producer_exhaustion_aborts_waiters() {
        let facility = station(3, 0, 4, 1);

        thread::scope(|s| {
            let handles: Vec<_> = (1..=4)
                .map(|number| {
                    let facility = &facility;
                    s.spawn(move || {
                        facility
                            .acquire(VehicleId::ordinary(number), Amounts::uniform(10))
                            .unwrap()
                            .is_aborted()
                    })
                })
                .collect();

            wait_until(&facility, |snap| snap.consume_waiting == 4);
            assert_eq!(facility.producer_done().unwrap(), 0);

            for handle in handles {
                assert!(handle.join().unwrap());
            }
        });

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.consume_waiting, 0);
        assert_eq!(snapshot.counters.aborts, 4);
    }

    #[test]
    fn test_consumer_exhaustion_aborts_deposits() {
        let facility = station(2, 100, 1, 2);

        thread::scope(|s| {
            let handle = s.spawn(|| {
                facility
                    .deposit(VehicleId::supply(1), Amounts::uniform(10))
                    .unwrap()
                    .is_aborted()
            });

            wait_until(&facility, |snap| snap.supply_waiting == 1);
            facility.consumer_done().unwrap();
            assert!(handle.join().unwrap());
        });

        let aborted = facility
            .deposit(VehicleId::supply(2), Amounts::uniform(10))
            .unwrap();
        assert!(aborted.is_aborted());
    }

    #[test]
    fn test_no_double_grant() {
        let facility = station(10, 100, 10, 1);

        thread::scope(|s| {
            let handles: Vec<_> = (1..=10)
                .map(|number| {
                    let facility = &facility;
                    s.spawn(move || {
                        facility
                            .acquire(VehicleId::ordinary(number), Amounts::uniform(30))
                            .unwrap()
                    })
                })
                .collect();

            wait_until(&facility, |snap| {
                snap.counters.grants() == 3 && snap.consume_waiting == 7
            });
            let snapshot = facility.snapshot();
            assert_eq!(snapshot.ledger.reserved_out, Amounts::uniform(90));
            assert!(snapshot.is_consistent());

            facility.producer_done().unwrap();
            let admissions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let granted = admissions.iter().filter(|a| a.is_granted()).count();
            assert_eq!(granted, 3);

            for admission in admissions {
                if let Some(reservation) = admission.into_reservation() {
                    reservation.settle();
                }
            }
        });

        assert_eq!(facility.levels(), Amounts::uniform(10));
    }

    #[test]
    fn test_supply_queue_scanned_first() {
        let facility = station(1, 50, 2, 1);
        let holder = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(10))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let consumer = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(2), Amounts::uniform(10))
                    .unwrap()
                    .into_reservation()
                    .map(Reservation::settle)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            let producer = s.spawn(|| {
                facility
                    .deposit(VehicleId::supply(1), Amounts::uniform(10))
                    .unwrap()
                    .into_reservation()
                    .map(|r| {
                        let waiting = r.facility.snapshot().consume_waiting;
                        r.settle();
                        waiting
                    })
            });
            wait_until(&facility, |snap| snap.supply_waiting == 1);

            holder.settle();

            // The deposit got the slot while the consumer was still queued.
            assert_eq!(producer.join().unwrap(), Some(1));
            assert!(consumer.join().unwrap().is_some());
        });

        assert_eq!(facility.levels(), Amounts::uniform(40));
    }

    #[test]
    fn test_cancelled_wait_leaves_no_trace() {
        let facility = station(2, 20, 2, 1);
        let token = CancelToken::new();

        thread::scope(|s| {
            let head = s.spawn(|| {
                facility.acquire_cancellable(VehicleId::ordinary(1), Amounts::uniform(50), &token)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            let follower = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(2), Amounts::uniform(10))
                    .unwrap()
                    .into_reservation()
                    .map(Reservation::settle)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 2);

            assert_eq!(facility.cancel(&token), 1);
            let err = head.join().unwrap().unwrap_err();
            assert!(err.is_cancelled());

            // Removing the head let the follower through.
            assert_eq!(follower.join().unwrap(), Some(Amounts::uniform(10)));
        });

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.waiting(), 0);
        assert_eq!(snapshot.counters.cancellations, 1);
        assert_eq!(snapshot.ledger.reserved_out, Amounts::ZERO);
        assert_eq!(snapshot.ledger.levels, Amounts::uniform(10));
    }

    #[test]
    fn test_token_cancel_wakes_queued_request() {
        let facility = station(1, 0, 1, 1);
        let token = CancelToken::new();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                facility.acquire_cancellable(VehicleId::ordinary(1), Amounts::uniform(10), &token)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            assert!(token.cancel());
            let err = waiter.join().unwrap().unwrap_err();
            assert!(err.is_cancelled());
        });

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.waiting(), 0);
        assert_eq!(snapshot.counters.cancellations, 1);
        assert_eq!(snapshot.live_consumers, 1);
    }

    #[test]
    fn test_token_cancel_reaches_every_direction() {
        let facility = station(1, 100, 1, 2);
        let token = CancelToken::new();
        let holder = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(10))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let deposit = s.spawn(|| {
                facility.deposit_cancellable(VehicleId::supply(1), Amounts::uniform(5), &token)
            });
            wait_until(&facility, |snap| snap.supply_waiting == 1);
            let return_leg = s.spawn(|| {
                facility.acquire_return_leg(VehicleId::supply(2), Amounts::uniform(5), &token)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            token.cancel();
            assert!(deposit.join().unwrap().unwrap_err().is_cancelled());
            assert!(return_leg.join().unwrap().unwrap_err().is_cancelled());
        });

        assert_eq!(facility.snapshot().waiting(), 0);
        assert_eq!(holder.settle(), Amounts::uniform(90));
    }

    #[test]
    fn test_deposit_queued_on_space_granted_after_withdrawal() {
        let facility = station(2, 90, 1, 1);
        let refuel = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(30))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let delivery = s.spawn(|| {
                facility
                    .deposit(VehicleId::supply(1), Amounts::uniform(20))
                    .unwrap()
                    .into_reservation()
                    .map(|r| (r.waited() > Duration::ZERO, r.settle()))
            });
            wait_until(&facility, |snap| snap.supply_waiting == 1);

            // A slot is free; only storage space is missing.
            let snapshot = facility.snapshot();
            assert_eq!(snapshot.ledger.free_slots, 1);
            assert_eq!(snapshot.ledger.levels, Amounts::uniform(90));

            assert_eq!(refuel.settle(), Amounts::uniform(60));
            assert_eq!(delivery.join().unwrap(), Some((true, Amounts::uniform(80))));
        });

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.counters.queued_grants, 1);
        assert_eq!(snapshot.waiting(), 0);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_cancelled_token_rejected_on_arrival() {
        let facility = station(1, 100, 1, 1);
        let token = CancelToken::new();
        facility.cancel(&token);

        let result = facility.deposit_cancellable(VehicleId::supply(1), Amounts::ZERO, &token);
        assert!(matches!(result, Err(StationError::Cancelled { .. })));
        assert_eq!(facility.snapshot().counters.grants(), 0);
    }

    #[test]
    fn test_dropped_reservation_rolls_back() {
        let facility = station(1, 40, 1, 1);

        let admission = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(40))
            .unwrap();
        assert_eq!(facility.free_slots(), 0);
        drop(admission);

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.ledger.free_slots, 1);
        assert_eq!(snapshot.ledger.levels, Amounts::uniform(40));
        assert_eq!(snapshot.ledger.reserved_out, Amounts::ZERO);
        assert_eq!(snapshot.counters.rollbacks, 1);

        facility
            .deposit(VehicleId::supply(1), Amounts::uniform(10))
            .unwrap()
            .into_reservation()
            .unwrap()
            .release();
        assert_eq!(facility.levels(), Amounts::uniform(40));
    }

    #[test]
    fn test_configuration_faults() {
        let facility = station(1, 0, 1, 1);
        let err = facility
            .acquire(VehicleId::ordinary(1), Amounts::new(101, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            StationError::AmountExceedsCapacity {
                resource: Resource::Nitrogen,
                requested: 101,
                capacity: 100
            }
        ));
        assert!(err.is_config_fault());

        let dockless = Facility::with_counts(0, Amounts::uniform(10), 1, 1);
        assert!(matches!(
            dockless.acquire(VehicleId::ordinary(1), Amounts::uniform(1)),
            Err(StationError::NoDocks)
        ));
        assert_eq!(dockless.snapshot().waiting(), 0);
    }

    #[test]
    fn test_dockless_deposit_needs_no_slot() {
        let facility = Facility::new(
            StationConfig::new()
                .with_docks(0)
                .with_capacity(Amounts::uniform(100))
                .with_consumers(1)
                .with_deposit_mode(DepositMode::Dockless),
        )
        .unwrap();

        let reservation = facility
            .deposit(VehicleId::supply(1), Amounts::uniform(25))
            .unwrap()
            .into_reservation()
            .unwrap();
        assert!(!reservation.is_docked());
        assert_eq!(reservation.settle(), Amounts::uniform(25));
        assert_eq!(facility.free_slots(), 0);
    }

    #[test]
    fn test_late_consumer_stranded_behind_taken_stock() {
        // One dock, one withdrawal in service, no producers left.
        let facility = station(1, 60, 3, 0);
        let holder = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(10))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let second = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(2), Amounts::uniform(40))
                    .unwrap()
                    .into_reservation()
                    .map(Reservation::settle)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            let third = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(3), Amounts::uniform(40))
                    .unwrap()
                    .is_aborted()
            });
            wait_until(&facility, |snap| snap.consume_waiting == 2);

            holder.settle();
            assert_eq!(second.join().unwrap(), Some(Amounts::uniform(10)));
            assert!(third.join().unwrap());
        });
    }

    #[test]
    fn test_return_leg_of_last_producer() {
        let token = CancelToken::new();

        let empty = station(1, 0, 1, 1);
        let admission = empty
            .acquire_return_leg(VehicleId::supply(1), Amounts::uniform(5), &token)
            .unwrap();
        assert!(admission.is_aborted());

        // Stock covers the return leg on arrival but is taken by the consumer ahead.
        let facility = station(1, 20, 2, 1);
        let holder = facility
            .acquire(VehicleId::ordinary(1), Amounts::uniform(10))
            .unwrap()
            .into_reservation()
            .unwrap();

        thread::scope(|s| {
            let consumer = s.spawn(|| {
                facility
                    .acquire(VehicleId::ordinary(2), Amounts::uniform(10))
                    .unwrap()
                    .into_reservation()
                    .map(Reservation::settle)
            });
            wait_until(&facility, |snap| snap.consume_waiting == 1);

            let producer = s.spawn(|| {
                facility
                    .acquire_return_leg(VehicleId::supply(1), Amounts::uniform(5), &token)
                    .unwrap()
                    .is_aborted()
            });
            wait_until(&facility, |snap| snap.consume_waiting == 2);

            holder.settle();
            assert_eq!(consumer.join().unwrap(), Some(Amounts::ZERO));
            assert!(producer.join().unwrap());
        });

        let snapshot = facility.snapshot();
        assert_eq!(snapshot.live_producers, 1);
        assert_eq!(snapshot.waiting(), 0);
    }

    #[test]
    fn test_population_guard_retires_once() {
        let facility = station(1, 0, 2, 1);
        {
            let _guard = facility.consumer_guard();
        }
        assert_eq!(facility.snapshot().live_consumers, 1);

        let guard = facility.register_guard(Population::Consumers);
        assert_eq!(facility.snapshot().live_consumers, 2);
        assert_eq!(guard.retire().unwrap(), 1);

        assert_eq!(facility.consumer_done().unwrap(), 0);
        assert!(matches!(
            facility.consumer_done(),
            Err(StationError::PopulationUnderflow { .. })
        ));
        assert_eq!(facility.register_producer(), 2);
        drop(facility.register_guard(Population::Producers));
        assert_eq!(facility.snapshot().live_producers, 2);
    }

    #[test]
    fn test_conservation_under_contention() {
        let facility = Facility::new(
            StationConfig::new()
                .with_docks(2)
                .with_capacity(Amounts::uniform(200))
                .with_initial_levels(Amounts::uniform(100))
                .with_consumers(4)
                .with_producers(2),
        )
        .unwrap();

        let (withdrawn, deposited) = thread::scope(|s| {
            let consumers: Vec<_> = (1..=4)
                .map(|number| {
                    let facility = &facility;
                    s.spawn(move || {
                        let _guard = facility.consumer_guard();
                        let mut total = Amounts::ZERO;
                        for _ in 0..25 {
                            let amounts = Amounts::new(7, 3);
                            match facility.acquire(VehicleId::ordinary(number), amounts).unwrap() {
                                Admission::Granted(reservation) => {
                                    assert!(facility.snapshot().is_consistent());
                                    reservation.settle();
                                    total = total.saturating_add(amounts);
                                }
                                Admission::Aborted => break,
                            }
                        }
                        total
                    })
                })
                .collect();
            let producers: Vec<_> = (1..=2)
                .map(|number| {
                    let facility = &facility;
                    s.spawn(move || {
                        let _guard = facility.producer_guard();
                        let mut total = Amounts::ZERO;
                        for _ in 0..25 {
                            let amounts = Amounts::new(9, 5);
                            match facility.deposit(VehicleId::supply(number), amounts).unwrap() {
                                Admission::Granted(reservation) => {
                                    reservation.settle();
                                    total = total.saturating_add(amounts);
                                }
                                Admission::Aborted => break,
                            }
                        }
                        total
                    })
                })
                .collect();

            let withdrawn = consumers
                .into_iter()
                .map(|h| h.join().unwrap())
                .fold(Amounts::ZERO, Amounts::saturating_add);
            let deposited = producers
                .into_iter()
                .map(|h| h.join().unwrap())
                .fold(Amounts::ZERO, Amounts::saturating_add);
            (withdrawn, deposited)
        });

        let snapshot = facility.snapshot();
        assert!(snapshot.is_consistent());
        assert_eq!(snapshot.waiting(), 0);
        assert_eq!(snapshot.counters.outstanding(), 0);
        assert_eq!(
            snapshot.ledger.levels,
            Amounts::uniform(100)
                .saturating_add(deposited)
                .saturating_sub(withdrawn)
        );
    }
}
