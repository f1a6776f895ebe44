//! End-to-end alerting behaviour of the monitoring loop

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use pretty_assertions::assert_eq;
use solar_alert::{
    Metric,
    clock::ManualClock,
    monitor::{AlertOutcome, Monitor, MonitorHandle},
    state::MemoryStateStore,
};

use crate::helpers::*;

#[tokio::test]
async fn test_sustained_power_breach_alerts_once() {
    let mut harness = Harness::new(create_test_settings(), noon());
    let mut sent_at = vec![];

    for minutes in [0, 15, 30, 45] {
        let report = harness.poll_at(noon(), minutes, 750.0, 52.0).await.unwrap();
        if report.alerts_sent() > 0 {
            sent_at.push(minutes);
        }
    }

    assert_eq!(sent_at, vec![30]);

    let alerts = harness.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, Metric::Power);
    assert_eq!(alerts[0].snapshot.power, 750.0);
    assert!(!alerts[0].suppressed);

    let state = harness.monitor.metric_state(Metric::Power);
    assert_eq!(state.breach_started_at, Some(noon()));
    assert_eq!(
        state.last_alert_sent_at,
        Some(noon() + Duration::minutes(30))
    );
}

#[tokio::test]
async fn test_suppressed_pass_is_reported() {
    let mut harness = Harness::new(create_test_settings(), noon());

    for minutes in [0, 15, 30] {
        harness.poll_at(noon(), minutes, 750.0, 52.0).await.unwrap();
    }
    let report = harness.poll_at(noon(), 45, 750.0, 52.0).await.unwrap();

    assert_eq!(
        report.outcome_for(Metric::Power),
        Some(&AlertOutcome::Suppressed)
    );
    assert_eq!(report.alerts_sent(), 0);
}

#[tokio::test]
async fn test_transient_dip_restarts_sustain_window() {
    let mut harness = Harness::new(create_test_settings(), noon());
    let readings = [(0, 750.0), (15, 650.0), (30, 750.0), (45, 750.0)];

    for (minutes, power) in readings {
        let report = harness.poll_at(noon(), minutes, power, 52.0).await.unwrap();
        assert!(report.alerts.is_empty(), "unexpected alert at t={minutes}");
    }

    assert!(harness.notifier.alerts().is_empty());
    assert_eq!(
        harness.monitor.metric_state(Metric::Power).breach_started_at,
        Some(noon() + Duration::minutes(30))
    );

    // the restarted breach alerts once it has lasted 30 minutes on its own
    let report = harness.poll_at(noon(), 60, 750.0, 52.0).await.unwrap();
    assert_eq!(report.alerts_sent(), 1);
}

#[tokio::test]
async fn test_values_on_threshold_never_alert() {
    let mut harness = Harness::new(create_test_settings(), noon());

    for minutes in (0..=180).step_by(15) {
        harness.poll_at(noon(), minutes, 700.0, 51.0).await.unwrap();
    }

    assert!(harness.notifier.alerts().is_empty());
    assert!(!harness.monitor.metric_state(Metric::Power).is_breaching());
    assert!(
        !harness
            .monitor
            .metric_state(Metric::BatteryVoltage)
            .is_breaching()
    );
}

#[tokio::test]
async fn test_continuous_breach_realerts_after_interval() {
    let mut harness = Harness::new(create_test_settings(), noon());
    let mut sent_at = vec![];

    for minutes in (0..=150).step_by(15) {
        let report = harness.poll_at(noon(), minutes, 750.0, 52.0).await.unwrap();
        if report.alerts_sent() > 0 {
            sent_at.push(minutes);
        }
    }

    // first alert once sustained, then one per re-alert interval
    assert_eq!(sent_at, vec![30, 90, 150]);
}

#[tokio::test]
async fn test_dedup_survives_recovery_within_interval() {
    let mut harness = Harness::new(create_test_settings(), noon());

    harness.poll_at(noon(), 0, 520.0, 48.0).await.unwrap();
    harness.poll_at(noon(), 15, 520.0, 52.0).await.unwrap();
    let report = harness.poll_at(noon(), 30, 520.0, 48.0).await.unwrap();

    assert_eq!(
        report.outcome_for(Metric::BatteryVoltage),
        Some(&AlertOutcome::Suppressed)
    );

    let report = harness.poll_at(noon(), 60, 520.0, 48.0).await.unwrap();
    assert_eq!(
        report.outcome_for(Metric::BatteryVoltage),
        Some(&AlertOutcome::Sent)
    );
    assert_eq!(harness.notifier.alerts().len(), 2);
}

#[tokio::test]
async fn test_simultaneous_breaches_alert_independently() {
    let mut harness = Harness::new(create_test_settings(), noon());

    let report = harness.poll_at(noon(), 0, 750.0, 48.0).await.unwrap();
    assert_eq!(
        report.outcome_for(Metric::BatteryVoltage),
        Some(&AlertOutcome::Sent)
    );
    assert_eq!(report.outcome_for(Metric::Power), None);

    let report = harness.poll_at(noon(), 30, 750.0, 48.0).await.unwrap();
    assert_eq!(report.outcome_for(Metric::Power), Some(&AlertOutcome::Sent));
    assert_eq!(
        report.outcome_for(Metric::BatteryVoltage),
        Some(&AlertOutcome::Suppressed)
    );

    let metrics: Vec<Metric> = harness
        .notifier
        .alerts()
        .iter()
        .map(|alert| alert.metric)
        .collect();
    assert_eq!(metrics, vec![Metric::BatteryVoltage, Metric::Power]);
}

#[tokio::test]
async fn test_disabled_instant_alerts_still_track_state() {
    let mut settings = create_test_settings();
    settings.enable_instant_alerts = false;
    let mut harness = Harness::new(settings, noon());

    harness.poll_at(noon(), 0, 750.0, 52.0).await.unwrap();
    let report = harness.poll_at(noon(), 30, 750.0, 52.0).await.unwrap();

    assert_eq!(report.outcome_for(Metric::Power), Some(&AlertOutcome::Disabled));
    assert!(harness.notifier.alerts().is_empty());
    assert!(
        harness
            .monitor
            .metric_state(Metric::Power)
            .last_alert_sent_at
            .is_some()
    );
}

#[tokio::test]
async fn test_installations_do_not_share_state() {
    let mut breaching = Harness::new(create_test_settings(), noon());
    let mut healthy = Harness::new(create_test_settings(), noon());

    for minutes in [0, 15, 30] {
        breaching.poll_at(noon(), minutes, 750.0, 52.0).await.unwrap();
        healthy.poll_at(noon(), minutes, 300.0, 52.0).await.unwrap();
    }

    assert_eq!(breaching.notifier.alerts().len(), 1);
    assert!(healthy.notifier.alerts().is_empty());
    assert!(!healthy.monitor.metric_state(Metric::Power).is_breaching());
}

#[tokio::test]
async fn test_handle_poll_now_and_shutdown() {
    let clock = ManualClock::new(noon());
    let source = FakeSource::new(clock.clone());
    let notifier = RecordingNotifier::default();
    source.set(300.0, 48.0);

    let monitor = Monitor::new(
        create_test_settings(),
        Box::new(source.clone()),
        Box::new(notifier.clone()),
        Box::new(MemoryStateStore::new()),
        Arc::new(clock.clone()),
    );

    let (handle, task) = MonitorHandle::spawn(monitor);

    // the loop runs its first pass immediately, so the poll is the second
    let report = handle.poll_now().await.unwrap();
    assert_eq!(
        report.outcome_for(Metric::BatteryVoltage),
        Some(&AlertOutcome::Suppressed)
    );
    assert_eq!(source.fetch_count(), 2);
    assert_eq!(notifier.alerts().len(), 1);

    handle.shutdown().await.unwrap();
    tokio::time::timeout(StdDuration::from_secs(1), task)
        .await
        .expect("monitor loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_loop_stops_when_handle_dropped() {
    let harness = Harness::new(create_test_settings(), noon());

    let (handle, task) = MonitorHandle::spawn(harness.monitor);
    drop(handle);

    tokio::time::timeout(StdDuration::from_secs(1), task)
        .await
        .expect("monitor loop did not stop")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_poll_now_restarts_interval_timer() {
    let harness = Harness::new(create_test_settings(), noon());
    let source = harness.source.clone();

    let (handle, task) = MonitorHandle::spawn(harness.monitor);

    // first pass at t=0, manual poll at t=14min
    tokio::time::sleep(StdDuration::from_secs(14 * 60)).await;
    handle.poll_now().await.unwrap();
    assert_eq!(source.fetch_count(), 2);

    // the pass that was due at t=15min now waits until t=29min
    tokio::time::sleep(StdDuration::from_secs(10 * 60)).await;
    assert_eq!(source.fetch_count(), 2);

    tokio::time::sleep(StdDuration::from_secs(6 * 60)).await;
    assert_eq!(source.fetch_count(), 3);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
