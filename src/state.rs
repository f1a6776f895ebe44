//! Alert state storage
//!
//! Holds the per-metric breach/dedup state and the date of the last daily
//! report. The only implementation keeps everything in memory, so a restart
//! forgets in-flight breaches and sent alerts. A durable backend only has to
//! implement [`StateStore`]; the evaluator and scheduler never see it.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::Metric;

/// Rolling state for one monitored metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricState {
    /// Set while the metric is outside its bound, cleared as soon as it returns
    pub breach_started_at: Option<DateTime<Local>>,

    /// When an alert for this metric was last dispatched
    pub last_alert_sent_at: Option<DateTime<Local>>,
}

impl MetricState {
    pub fn is_breaching(&self) -> bool {
        self.breach_started_at.is_some()
    }
}

/// Storage for everything the monitoring loop remembers between passes.
///
/// Each monitored installation owns its own store; nothing is shared.
pub trait StateStore: Send {
    /// State for `metric`, created with defaults if it was never seen
    fn metric_state(&mut self, metric: Metric) -> MetricState;

    /// Replace the state for `metric`
    fn set_metric_state(&mut self, metric: Metric, state: MetricState);

    fn last_report_date(&self) -> Option<NaiveDate>;

    fn set_last_report_date(&mut self, date: NaiveDate);
}

/// In-memory state store (no persistence)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    metrics: HashMap<Metric, MetricState>,
    last_report_date: Option<NaiveDate>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn metric_state(&mut self, metric: Metric) -> MetricState {
        *self.metrics.entry(metric).or_default()
    }

    fn set_metric_state(&mut self, metric: Metric, state: MetricState) {
        self.metrics.insert(metric, state);
    }

    fn last_report_date(&self) -> Option<NaiveDate> {
        self.last_report_date
    }

    fn set_last_report_date(&mut self, date: NaiveDate) {
        self.last_report_date = Some(date);
    }
}
