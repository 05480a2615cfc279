//! Metrics collection during a station run.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use fuelbay_core::{Amounts, Direction, VehicleId, VehicleKind};

/// Collects metrics while agents use the station.
///
/// Direction totals sit behind their own locks; per-vehicle stats live in a
/// concurrent map so agents on different threads never contend on one entry.
#[derive(Default)]
pub struct MetricsCollector {
    timing: RwLock<TimingMetrics>,
    consume: RwLock<DirectionMetrics>,
    supply: RwLock<DirectionMetrics>,
    vehicles: DashMap<VehicleId, VehicleStats>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of the run.
    pub fn record_start(&self) {
        self.timing.write().start_time = Some(Instant::now());
    }

    /// Record the end of the run.
    pub fn record_end(&self) {
        let mut timing = self.timing.write();
        timing.end_time = Some(Instant::now());
        if let (Some(start), Some(end)) = (timing.start_time, timing.end_time) {
            timing.run_time = end.duration_since(start);
        }
    }

    /// Record a granted request.
    pub fn record_grant(&self, vehicle: VehicleId, direction: Direction, waited: Duration) {
        {
            let mut metrics = self.direction(direction).write();
            metrics.grants += 1;
            metrics.total_wait += waited;
            if waited > metrics.max_wait {
                metrics.max_wait = waited;
            }
            if waited > Duration::ZERO {
                metrics.queued_grants += 1;
            }
        }
        let mut stats = self.vehicle(vehicle);
        stats.grants += 1;
        stats.total_wait += waited;
    }

    /// Record a settled grant.
    pub fn record_settle(&self, vehicle: VehicleId, direction: Direction, amounts: Amounts) {
        {
            let mut metrics = self.direction(direction).write();
            metrics.settlements += 1;
            metrics.moved = metrics.moved.saturating_add(amounts);
        }
        let mut stats = self.vehicle(vehicle);
        match direction {
            Direction::Consume => stats.withdrawn = stats.withdrawn.saturating_add(amounts),
            Direction::Supply => stats.deposited = stats.deposited.saturating_add(amounts),
        }
    }

    /// Record an aborted request.
    pub fn record_abort(&self, vehicle: VehicleId, direction: Direction) {
        self.direction(direction).write().aborts += 1;
        self.vehicle(vehicle).aborts += 1;
    }

    /// Record a cancelled wait.
    pub fn record_cancel(&self, vehicle: VehicleId, direction: Direction) {
        self.direction(direction).write().cancellations += 1;
        self.vehicle(vehicle).cancellations += 1;
    }

    /// Record a completed trip.
    pub fn record_trip(&self, vehicle: VehicleId) {
        self.vehicle(vehicle).trips += 1;
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut vehicles: Vec<VehicleStats> =
            self.vehicles.iter().map(|entry| entry.value().clone()).collect();
        vehicles.sort_by_key(|stats| {
            (
                matches!(stats.vehicle.kind, VehicleKind::Supply),
                stats.vehicle.number,
            )
        });

        MetricsSnapshot {
            timing: self.timing.read().clone(),
            consume: self.consume.read().clone(),
            supply: self.supply.read().clone(),
            vehicles,
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        *self.timing.write() = TimingMetrics::default();
        *self.consume.write() = DirectionMetrics::default();
        *self.supply.write() = DirectionMetrics::default();
        self.vehicles.clear();
    }

    fn direction(&self, direction: Direction) -> &RwLock<DirectionMetrics> {
        match direction {
            Direction::Consume => &self.consume,
            Direction::Supply => &self.supply,
        }
    }

    fn vehicle(&self, vehicle: VehicleId) -> dashmap::mapref::one::RefMut<'_, VehicleId, VehicleStats> {
        self.vehicles
            .entry(vehicle)
            .or_insert_with(|| VehicleStats::new(vehicle))
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("timing", &*self.timing.read())
            .field("consume", &*self.consume.read())
            .field("supply", &*self.supply.read())
            .field("vehicles", &self.vehicles.len())
            .finish()
    }
}

/// Snapshot of collected metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Timing metrics.
    pub timing: TimingMetrics,
    /// Withdrawal metrics.
    pub consume: DirectionMetrics,
    /// Deposit metrics.
    pub supply: DirectionMetrics,
    /// Per-vehicle stats, ordinary vehicles first.
    pub vehicles: Vec<VehicleStats>,
}

impl MetricsSnapshot {
    /// Total amounts withdrawn by settled grants.
    pub fn withdrawn(&self) -> Amounts {
        self.consume.moved
    }

    /// Total amounts deposited by settled grants.
    pub fn deposited(&self) -> Amounts {
        self.supply.moved
    }

    /// Compare final levels against initial levels plus the recorded flows.
    pub fn conservation_delta(&self, initial: Amounts, final_levels: Amounts) -> ConservationDelta {
        let delta = |start: u64, end: u64, added: u64, removed: u64| {
            i128::from(end) - (i128::from(start) + i128::from(added) - i128::from(removed))
        };
        ConservationDelta {
            nitrogen: delta(
                initial.nitrogen,
                final_levels.nitrogen,
                self.supply.moved.nitrogen,
                self.consume.moved.nitrogen,
            ),
            quantum: delta(
                initial.quantum,
                final_levels.quantum,
                self.supply.moved.quantum,
                self.consume.moved.quantum,
            ),
        }
    }

    /// Stats of one vehicle.
    pub fn vehicle(&self, vehicle: VehicleId) -> Option<&VehicleStats> {
        self.vehicles.iter().find(|stats| stats.vehicle == vehicle)
    }
}

/// Unexplained difference between recorded flows and final levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservationDelta {
    /// Nitrogen difference.
    pub nitrogen: i128,
    /// Quantum difference.
    pub quantum: i128,
}

impl ConservationDelta {
    /// Check whether every unit is accounted for.
    pub fn is_balanced(&self) -> bool {
        self.nitrogen == 0 && self.quantum == 0
    }
}

/// Timing-related metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingMetrics {
    /// When the run started.
    #[serde(skip)]
    pub start_time: Option<Instant>,
    /// When the run ended.
    #[serde(skip)]
    pub end_time: Option<Instant>,
    /// Total run time.
    #[serde(with = "duration_serde")]
    pub run_time: Duration,
}

/// Metrics of one request direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectionMetrics {
    /// Granted requests.
    pub grants: u64,
    /// Granted requests that had to queue first.
    pub queued_grants: u64,
    /// Settled grants.
    pub settlements: u64,
    /// Aborted requests.
    pub aborts: u64,
    /// Cancelled waits.
    pub cancellations: u64,
    /// Amounts moved by settled grants.
    pub moved: Amounts,
    /// Total time spent queued.
    #[serde(with = "duration_serde")]
    pub total_wait: Duration,
    /// Longest single wait.
    #[serde(with = "duration_serde")]
    pub max_wait: Duration,
}

impl DirectionMetrics {
    /// Mean wait over all grants.
    pub fn mean_wait(&self) -> Duration {
        if self.grants == 0 {
            return Duration::ZERO;
        }
        self.total_wait / u32::try_from(self.grants).unwrap_or(u32::MAX)
    }
}

/// Metrics of one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleStats {
    /// The vehicle.
    pub vehicle: VehicleId,
    /// Completed trips.
    pub trips: u32,
    /// Granted requests.
    pub grants: u64,
    /// Aborted requests.
    pub aborts: u64,
    /// Cancelled waits.
    pub cancellations: u64,
    /// Amounts withdrawn.
    pub withdrawn: Amounts,
    /// Amounts deposited.
    pub deposited: Amounts,
    /// Total time spent queued.
    #[serde(with = "duration_serde")]
    pub total_wait: Duration,
}

impl VehicleStats {
    fn new(vehicle: VehicleId) -> Self {
        Self {
            vehicle,
            trips: 0,
            grants: 0,
            aborts: 0,
            cancellations: 0,
            withdrawn: Amounts::ZERO,
            deposited: Amounts::ZERO,
            total_wait: Duration::ZERO,
        }
    }
}

/// Custom serde for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}
