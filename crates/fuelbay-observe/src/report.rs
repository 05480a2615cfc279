//! Run reports.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fuelbay_core::{Amounts, StationConfig, StationSnapshot, VehicleId};

use crate::metrics::{ConservationDelta, MetricsSnapshot};

/// Unique identifier for a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a vehicle's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleEnding {
    /// Every planned trip was completed.
    Completed,
    /// A request was aborted; the vehicle gave up.
    Aborted,
    /// The run was cancelled while the vehicle was active.
    Cancelled,
    /// The vehicle stopped on an error.
    Failed {
        /// Error message.
        message: String,
    },
}

impl VehicleEnding {
    /// Check whether the vehicle completed its plan.
    pub fn is_completed(&self) -> bool {
        matches!(self, VehicleEnding::Completed)
    }
}

impl std::fmt::Display for VehicleEnding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleEnding::Completed => write!(f, "completed"),
            VehicleEnding::Aborted => write!(f, "aborted"),
            VehicleEnding::Cancelled => write!(f, "cancelled"),
            VehicleEnding::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Final outcome of one vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleOutcome {
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

/// A diagnostic message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Message.
    pub message: String,
    /// Additional context.
    pub context: Option<String>,
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// Complete report of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run ID.
    pub run_id: RunId,
    /// Station configuration the run used.
    pub config: StationConfig,
    /// Station state after every vehicle finished.
    pub station: StationSnapshot,
    /// Collected metrics.
    pub metrics: MetricsSnapshot,
    /// Per-vehicle outcomes.
    pub vehicles: Vec<VehicleOutcome>,
    /// Diagnostic messages.
    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    /// Create a new run report.
    pub fn new(config: StationConfig, station: StationSnapshot, metrics: MetricsSnapshot) -> Self {
        Self {
            run_id: RunId::new(),
            config,
            station,
            metrics,
            vehicles: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Add a vehicle outcome.
    pub fn add_outcome(&mut self, outcome: VehicleOutcome) {
        self.vehicles.push(outcome);
    }

    /// Add a diagnostic message.
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Add an info diagnostic.
    pub fn add_info(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Info, message.into());
    }

    /// Add a warning diagnostic.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Warning, message.into());
    }

    /// Add an error diagnostic.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Error, message.into());
    }

    fn push(&mut self, level: DiagnosticLevel, message: String) {
        self.diagnostics.push(Diagnostic {
            level,
            message,
            context: None,
        });
    }

    /// Flows recorded by the metrics against the station's final levels.
    pub fn conservation(&self) -> ConservationDelta {
        self.metrics
            .conservation_delta(self.config.initial_levels, self.station.ledger.levels)
    }

    /// Number of vehicles that ended a certain way.
    pub fn count_ending(&self, predicate: impl Fn(&VehicleEnding) -> bool) -> usize {
        self.vehicles.iter().filter(|v| predicate(&v.ending)).count()
    }

    /// Check whether the run left the station consistent and balanced, with
    /// no error diagnostics.
    pub fn is_sound(&self) -> bool {
        self.station.is_consistent()
            && self.station.waiting() == 0
            && self.conservation().is_balanced()
            && !self
                .diagnostics
                .iter()
                .any(|d| d.level == DiagnosticLevel::Error)
    }

    /// Format as human-readable text.
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Run Report: {}\n", self.run_id));
        output.push_str(&format!(
            "Station: {} docks, capacity {}, policy {:?}, deposits {:?}\n",
            self.config.docks, self.config.capacity, self.config.policy, self.config.deposit_mode
        ));
        output.push('\n');

        let ledger = &self.station.ledger;
        output.push_str("Levels:\n");
        output.push_str(&format!("  Initial: {}\n", self.config.initial_levels));
        output.push_str(&format!("  Final:   {}\n", ledger.levels));
        output.push_str(&format!("  Withdrawn: {}\n", self.metrics.withdrawn()));
        output.push_str(&format!("  Deposited: {}\n", self.metrics.deposited()));
        let delta = self.conservation();
        if delta.is_balanced() {
            output.push_str("  Conservation: balanced\n");
        } else {
            output.push_str(&format!(
                "  Conservation: off by {}N/{}Q\n",
                delta.nitrogen, delta.quantum
            ));
        }

        output.push('\n');
        output.push_str("Metrics:\n");
        output.push_str(&format!("  Run Time: {:?}\n", self.metrics.timing.run_time));
        for (label, metrics) in [("Consume", &self.metrics.consume), ("Supply", &self.metrics.supply)] {
            output.push_str(&format!(
                "  {}: {} granted ({} queued), {} aborted, {} cancelled, max wait {}\n",
                label,
                metrics.grants,
                metrics.queued_grants,
                metrics.aborts,
                metrics.cancellations,
                format_wait(metrics.max_wait)
            ));
        }

        if !self.vehicles.is_empty() {
            output.push_str("\nVehicles:\n");
            for outcome in &self.vehicles {
                output.push_str(&format!(
                    "  {:<12} {}/{} trips  {}\n",
                    outcome.vehicle.to_string(),
                    outcome.trips_completed,
                    outcome.trips_planned,
                    outcome.ending
                ));
            }
        }

        if !self.diagnostics.is_empty() {
            output.push_str("\nDiagnostics:\n");
            for diag in &self.diagnostics {
                let level = match diag.level {
                    DiagnosticLevel::Info => "INFO",
                    DiagnosticLevel::Warning => "WARN",
                    DiagnosticLevel::Error => "ERROR",
                };
                output.push_str(&format!("  [{}] {}\n", level, diag.message));
            }
        }

        output
    }

    /// Format as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Format as pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Wait time formatted for humans.
pub fn format_wait(wait: Duration) -> String {
    if wait < Duration::from_millis(1) {
        format!("{}us", wait.as_micros())
    } else {
        format!("{}ms", wait.as_millis())
    }
}
