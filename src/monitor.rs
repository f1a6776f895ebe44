//! Monitoring loop
//!
//! One pass fetches a snapshot, evaluates thresholds, notifies and checks
//! whether the daily report is due. Passes never overlap.
//!
//! ```text
//!   Idle ──(interval elapsed | PollNow)──► Evaluating ──(always)──► Idle
//!     │
//!     └──(Shutdown | handle dropped)──► stopped
//! ```
//!
//! Commands are only looked at while idle, so a shutdown never interrupts a
//! pass half way.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    Metric, TelemetrySnapshot,
    clock::Clock,
    config::MonitoringSettings,
    error::FetchError,
    evaluator::{MetricPolicy, evaluate},
    history::DailyHistory,
    notifier::Notifier,
    scheduler::ReportSchedule,
    source::TelemetrySource,
    state::{MetricState, StateStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    Sent,
    SendFailed(String),
    Suppressed,
    /// Instant alerts are turned off in the configuration
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    SendFailed(String),
}

/// What happened during one completed pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub timestamp: DateTime<Local>,
    pub alerts: Vec<(Metric, AlertOutcome)>,
    pub report: Option<ReportOutcome>,
}

impl PassReport {
    pub fn alerts_sent(&self) -> usize {
        self.alerts
            .iter()
            .filter(|(_, outcome)| *outcome == AlertOutcome::Sent)
            .count()
    }

    pub fn outcome_for(&self, metric: Metric) -> Option<&AlertOutcome> {
        self.alerts
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, outcome)| outcome)
    }
}

pub struct Monitor {
    settings: MonitoringSettings,
    policies: Vec<MetricPolicy>,
    source: Box<dyn TelemetrySource>,
    notifier: Box<dyn Notifier>,
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    history: DailyHistory,
}

impl Monitor {
    pub fn new(
        settings: MonitoringSettings,
        source: Box<dyn TelemetrySource>,
        notifier: Box<dyn Notifier>,
        store: Box<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policies: settings.policies(),
            settings,
            source,
            notifier,
            store,
            clock,
            history: DailyHistory::new(),
        }
    }

    pub fn metric_state(&mut self, metric: Metric) -> MetricState {
        self.store.metric_state(metric)
    }

    /// Run a single fetch/evaluate/notify pass.
    ///
    /// A fetch failure aborts the pass before any state is touched.
    /// Notification failures are reported in the returned [`PassReport`];
    /// the alert and report state they belong to stays committed.
    #[instrument(skip(self))]
    pub async fn run_once(&mut self) -> Result<PassReport, FetchError> {
        let now = self.clock.now();

        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("fetch failed, skipping pass: {e}");
                return Err(e);
            }
        };

        debug!(
            power = snapshot.power,
            battery_voltage = snapshot.battery_voltage,
            energy_today = snapshot.energy_today,
            status = %snapshot.status,
            "received snapshot"
        );

        self.history.record(now, &snapshot);

        let decisions = evaluate(&snapshot, &self.policies, self.store.as_mut(), now);
        if decisions.is_empty() {
            debug!("no sustained breach");
        }

        let mut alerts = vec![];
        for decision in &decisions {
            let metric = decision.metric;
            let value = decision.value();

            let outcome = if decision.suppressed {
                info!(%metric, value, "breach suppressed, alert sent recently");
                AlertOutcome::Suppressed
            } else if !self.settings.enable_instant_alerts {
                info!(%metric, value, "breach sustained, instant alerts disabled");
                AlertOutcome::Disabled
            } else {
                match self.notifier.send_alert(decision).await {
                    Ok(()) => {
                        info!(%metric, value, severity = %decision.severity, "alert sent");
                        AlertOutcome::Sent
                    }
                    Err(e) => {
                        error!(%metric, value, "alert send failed: {e}");
                        AlertOutcome::SendFailed(e.to_string())
                    }
                }
            };

            alerts.push((metric, outcome));
        }

        let report = if self.settings.enable_daily_reports {
            self.send_report_if_due(now, &snapshot).await
        } else {
            None
        };

        Ok(PassReport {
            timestamp: now,
            alerts,
            report,
        })
    }

    async fn send_report_if_due(
        &mut self,
        now: DateTime<Local>,
        latest: &TelemetrySnapshot,
    ) -> Option<ReportOutcome> {
        let mut schedule =
            ReportSchedule::new(self.settings.daily_report_time, self.store.last_report_date());
        if !schedule.is_due(now) {
            return None;
        }

        let summary = self.history.summary(now, latest);
        schedule.mark_sent(now);
        if let Some(date) = schedule.last_report_date {
            self.store.set_last_report_date(date);
        }

        let outcome = match self.notifier.send_report(&summary).await {
            Ok(()) => {
                info!(date = %summary.date, "daily report sent");
                ReportOutcome::Sent
            }
            Err(e) => {
                error!(date = %summary.date, "daily report send failed: {e}");
                ReportOutcome::SendFailed(e.to_string())
            }
        };

        Some(outcome)
    }

    /// Run passes until told to stop.
    ///
    /// The first pass starts immediately; each following one starts
    /// `check_interval` after the previous pass finished, whether that pass
    /// was scheduled or requested through [`MonitorCommand::PollNow`].
    /// Commands are handled while waiting for the next pass.
    #[instrument(skip_all)]
    pub async fn run_forever(mut self, mut command_rx: mpsc::Receiver<MonitorCommand>) {
        let interval = self.settings.check_interval;
        debug!("starting monitor loop with interval {interval:?}");

        loop {
            if let Err(e) = self.run_once().await {
                warn!("pass aborted: {e}");
            }
            let mut next_pass = Instant::now() + interval;

            loop {
                tokio::select! {
                    _ = sleep_until(next_pass) => break,

                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(MonitorCommand::PollNow { respond_to }) => {
                                debug!("received PollNow command");
                                let result = self.run_once().await;
                                let _ = respond_to.send(result);
                                next_pass = Instant::now() + interval;
                            }

                            Some(MonitorCommand::Shutdown) => {
                                debug!("received shutdown command, monitor loop stopped");
                                return;
                            }

                            None => {
                                warn!("command channel closed, monitor loop stopped");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Process exit status for a single pass.
///
/// A completed pass is a success even when a notification failed; only a
/// failed fetch is not.
pub fn exit_status(result: &Result<PassReport, FetchError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

#[derive(Debug)]
pub enum MonitorCommand {
    /// Run a pass right away, outside the interval timer
    PollNow {
        respond_to: oneshot::Sender<Result<PassReport, FetchError>>,
    },

    /// Stop once the loop is idle
    Shutdown,
}

/// Handle for controlling a running [`Monitor`]
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the monitor loop as a tokio task.
    pub fn spawn(monitor: Monitor) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let task = tokio::spawn(monitor.run_forever(cmd_rx));

        (Self { sender: cmd_tx }, task)
    }

    pub async fn poll_now(&self) -> Result<PassReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        let report = rx.await.context("failed to receive response")??;
        Ok(report)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
