pub mod clock;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod monitor;
pub mod notifier;
pub mod scheduler;
pub mod source;
pub mod state;

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One reading of the inverter, produced once per poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Local>,
    /// Output power in watts
    pub power: f64,
    /// Battery voltage in volts
    pub battery_voltage: f64,
    /// Energy produced today in kWh
    pub energy_today: f64,
    pub status: String,
}

impl TelemetrySnapshot {
    /// Current value of the given metric.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Power => self.power,
            Metric::BatteryVoltage => self.battery_voltage,
        }
    }
}

/// Metrics that are checked against thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Power,
    BatteryVoltage,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Power, Metric::BatteryVoltage];

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Power => "W",
            Metric::BatteryVoltage => "V",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Power => write!(f, "power"),
            Metric::BatteryVoltage => write!(f, "battery_voltage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Outcome of a sustained breach for a single metric.
///
/// A decision with `suppressed == true` is only recorded for the audit log;
/// it is never handed to a notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub metric: Metric,
    pub severity: Severity,
    /// Configured bound that was crossed
    pub threshold: f64,
    pub snapshot: TelemetrySnapshot,
    pub suppressed: bool,
}

impl AlertDecision {
    pub fn value(&self) -> f64 {
        self.snapshot.value(self.metric)
    }
}
