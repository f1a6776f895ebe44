//! Daily report gating
//!
//! A report is due on the first poll at or after the configured time of
//! day, once per calendar day. Days the process was not running at the
//! scheduled time are skipped, never back-filled.

use chrono::{DateTime, Local, NaiveDate, NaiveTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    pub daily_report_time: NaiveTime,
    pub last_report_date: Option<NaiveDate>,
}

impl ReportSchedule {
    pub fn new(daily_report_time: NaiveTime, last_report_date: Option<NaiveDate>) -> Self {
        Self {
            daily_report_time,
            last_report_date,
        }
    }

    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        due_report(now, self)
    }

    /// Record that today's report has been dispatched
    pub fn mark_sent(&mut self, now: DateTime<Local>) {
        self.last_report_date = Some(now.date_naive());
    }
}

/// Whether the daily report should be sent at `now`.
pub fn due_report(now: DateTime<Local>, schedule: &ReportSchedule) -> bool {
    if now.time() < schedule.daily_report_time {
        return false;
    }

    schedule.last_report_date != Some(now.date_naive())
}

/// Parse a `HH:MM` time of day
pub fn parse_report_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}
