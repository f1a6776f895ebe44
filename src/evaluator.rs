//! Threshold evaluation
//!
//! ## Breach State Machine
//!
//! ```text
//! value within bound:
//!   no breach recorded            → BreachEvaluation::Ok
//!   breach recorded               → BreachEvaluation::BackToOk (breach cleared)
//!
//! value outside bound:
//!   elapsed < sustain             → BreachEvaluation::Pending (breach start kept)
//!   last alert < realert_after    → BreachEvaluation::Suppressed
//!   otherwise                     → BreachEvaluation::Alert (last alert = now)
//! ```
//!
//! Comparisons are strict: a value sitting exactly on the bound is not a breach.

use chrono::{DateTime, Duration, Local};
use tracing::{debug, trace};

use crate::{
    AlertDecision, Metric, Severity, TelemetrySnapshot,
    state::{MetricState, StateStore},
};

/// Which side of the limit is unsafe
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Above(f64),
    Below(f64),
}

impl Bound {
    pub fn is_breached(&self, value: f64) -> bool {
        match *self {
            Bound::Above(limit) => value > limit,
            Bound::Below(limit) => value < limit,
        }
    }

    pub fn limit(&self) -> f64 {
        match *self {
            Bound::Above(limit) | Bound::Below(limit) => limit,
        }
    }
}

/// How a single metric is checked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPolicy {
    pub metric: Metric,
    pub bound: Bound,
    pub severity: Severity,
    /// How long a breach must last before it may alert
    pub sustain: Duration,
    /// Minimum time between two alerts for this metric
    pub realert_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachEvaluation {
    Ok,
    BackToOk,
    Pending,
    Suppressed,
    Alert,
}

impl BreachEvaluation {
    /// Evaluate one reading and update `state` accordingly.
    pub fn evaluate(
        value: f64,
        policy: &MetricPolicy,
        state: &mut MetricState,
        now: DateTime<Local>,
    ) -> BreachEvaluation {
        if !policy.bound.is_breached(value) {
            return match state.breach_started_at.take() {
                Some(_) => BreachEvaluation::BackToOk,
                None => BreachEvaluation::Ok,
            };
        }

        let started = *state.breach_started_at.get_or_insert(now);
        if now - started < policy.sustain {
            return BreachEvaluation::Pending;
        }

        if let Some(last) = state.last_alert_sent_at
            && now - last < policy.realert_after
        {
            return BreachEvaluation::Suppressed;
        }

        state.last_alert_sent_at = Some(now);
        BreachEvaluation::Alert
    }
}

/// Evaluate every policy against `snapshot`.
///
/// Returns one decision per metric whose breach is sustained, including
/// suppressed ones. Metrics are evaluated independently.
pub fn evaluate(
    snapshot: &TelemetrySnapshot,
    policies: &[MetricPolicy],
    store: &mut dyn StateStore,
    now: DateTime<Local>,
) -> Vec<AlertDecision> {
    let mut decisions = vec![];

    for policy in policies {
        let metric = policy.metric;
        let value = snapshot.value(metric);

        let mut state = store.metric_state(metric);
        let evaluation = BreachEvaluation::evaluate(value, policy, &mut state, now);
        store.set_metric_state(metric, state);

        trace!(
            "{metric}: {value} (bound: {:?}) -> {evaluation:?}",
            policy.bound
        );

        match evaluation {
            BreachEvaluation::Ok => {}
            BreachEvaluation::BackToOk => {
                debug!(%metric, value, "metric is back within bounds, breach cleared");
            }
            BreachEvaluation::Pending => {
                let since = state.breach_started_at.unwrap_or(now);
                debug!(
                    %metric,
                    value,
                    elapsed_minutes = (now - since).num_minutes(),
                    sustain_minutes = policy.sustain.num_minutes(),
                    "breach pending"
                );
            }
            BreachEvaluation::Suppressed | BreachEvaluation::Alert => {
                decisions.push(AlertDecision {
                    metric,
                    severity: policy.severity,
                    threshold: policy.bound.limit(),
                    snapshot: snapshot.clone(),
                    suppressed: evaluation == BreachEvaluation::Suppressed,
                });
            }
        }
    }

    decisions
}
