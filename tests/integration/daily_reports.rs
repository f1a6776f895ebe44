//! Daily report scheduling through the monitoring loop

use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use solar_alert::monitor::ReportOutcome;

use crate::helpers::*;

#[tokio::test]
async fn test_exactly_one_report_on_first_poll_after_report_time() {
    let start = at(17, 0);
    let mut harness = Harness::new(create_test_settings(), start);
    let mut reported_at = vec![];

    for minutes in (0..=180).step_by(15) {
        let report = harness.poll_at(start, minutes, 400.0, 52.0).await.unwrap();
        if report.report == Some(ReportOutcome::Sent) {
            reported_at.push(minutes);
        }
    }

    assert_eq!(reported_at, vec![60]);

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
}

#[tokio::test]
async fn test_report_fires_on_drifted_poll() {
    let start = at(17, 52);
    let mut harness = Harness::new(create_test_settings(), start);

    let before = harness.poll_at(start, 0, 400.0, 52.0).await.unwrap();
    let after = harness.poll_at(start, 15, 400.0, 52.0).await.unwrap();
    let later = harness.poll_at(start, 30, 400.0, 52.0).await.unwrap();

    assert_eq!(before.report, None);
    assert_eq!(after.report, Some(ReportOutcome::Sent));
    assert_eq!(later.report, None);
}

#[tokio::test]
async fn test_report_summarises_the_day() {
    let start = at(16, 0);
    let mut harness = Harness::new(create_test_settings(), start);
    let readings = [(0, 200.0, 52.5), (60, 650.0, 50.0), (120, 300.0, 53.0)];

    for (minutes, power, voltage) in readings {
        harness.poll_at(start, minutes, power, voltage).await.unwrap();
    }

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);

    let summary = &reports[0];
    assert_eq!(summary.sample_count, 3);
    assert_eq!(summary.peak_power, 650.0);
    assert_eq!(summary.min_battery_voltage, 50.0);
    assert_eq!(summary.max_battery_voltage, 53.0);
    assert_eq!(summary.latest.power, 300.0);
}

#[tokio::test]
async fn test_report_sent_again_next_day() {
    let start = at(18, 0);
    let mut harness = Harness::new(create_test_settings(), start);

    harness.poll_at(start, 0, 400.0, 52.0).await.unwrap();
    harness.poll_at(start, 15, 400.0, 52.0).await.unwrap();

    let next_day = (Duration::days(1) + Duration::minutes(5)).num_minutes();
    let report = harness.poll_at(start, next_day, 400.0, 52.0).await.unwrap();

    assert_eq!(report.report, Some(ReportOutcome::Sent));
    let dates: Vec<NaiveDate> = harness.notifier.reports().iter().map(|r| r.date).collect();
    assert_eq!(
        dates,
        vec![
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        ]
    );
}

#[tokio::test]
async fn test_missed_day_is_not_backfilled() {
    let start = at(18, 30);
    let mut harness = Harness::new(create_test_settings(), start);

    harness.poll_at(start, 0, 400.0, 52.0).await.unwrap();

    // down for all of the next day, back two days later in the morning
    let morning = (Duration::days(2) - Duration::hours(10)).num_minutes();
    let report = harness.poll_at(start, morning, 400.0, 52.0).await.unwrap();

    assert_eq!(report.report, None);
    assert_eq!(harness.notifier.reports().len(), 1);
}

#[tokio::test]
async fn test_disabled_reports_are_never_sent() {
    let mut settings = create_test_settings();
    settings.enable_daily_reports = false;
    let start = at(17, 0);
    let mut harness = Harness::new(settings, start);

    for minutes in (0..=180).step_by(15) {
        let report = harness.poll_at(start, minutes, 400.0, 52.0).await.unwrap();
        assert_eq!(report.report, None);
    }

    assert!(harness.notifier.reports().is_empty());
}
