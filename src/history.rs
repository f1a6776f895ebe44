//! Readings of the current day, used to build the daily report.
//!
//! Held in memory only and dropped at local midnight.

use std::collections::VecDeque;

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use tracing::trace;

use crate::TelemetrySnapshot;

/// Maximum readings kept for a single day
const MAX_SAMPLES_PER_DAY: usize = 2880;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    power: f64,
    battery_voltage: f64,
}

#[derive(Debug, Default)]
pub struct DailyHistory {
    date: Option<NaiveDate>,
    samples: VecDeque<Sample>,
}

/// Content of the daily report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub sample_count: usize,
    pub peak_power: f64,
    pub average_power: f64,
    pub min_battery_voltage: f64,
    pub max_battery_voltage: f64,
    pub latest: TelemetrySnapshot,
}

impl DailyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn record(&mut self, now: DateTime<Local>, snapshot: &TelemetrySnapshot) {
        let today = now.date_naive();
        if self.date != Some(today) {
            trace!("starting reading history for {today}");
            self.samples.clear();
            self.date = Some(today);
        }

        if self.samples.len() == MAX_SAMPLES_PER_DAY {
            self.samples.pop_front();
        }

        self.samples.push_back(Sample {
            power: snapshot.power,
            battery_voltage: snapshot.battery_voltage,
        });
    }

    /// Summarise today's readings, with `latest` as the most recent snapshot.
    pub fn summary(&self, now: DateTime<Local>, latest: &TelemetrySnapshot) -> DailySummary {
        let today = now.date_naive();
        let samples: Vec<Sample> = if self.date == Some(today) {
            self.samples.iter().copied().collect()
        } else {
            vec![]
        };

        let seed = Sample {
            power: latest.power,
            battery_voltage: latest.battery_voltage,
        };

        let (peak_power, min_voltage, max_voltage) = samples.iter().fold(
            (seed.power, seed.battery_voltage, seed.battery_voltage),
            |(peak, min, max), sample| {
                (
                    peak.max(sample.power),
                    min.min(sample.battery_voltage),
                    max.max(sample.battery_voltage),
                )
            },
        );

        let average_power = if samples.is_empty() {
            latest.power
        } else {
            samples.iter().map(|s| s.power).sum::<f64>() / samples.len() as f64
        };

        DailySummary {
            date: today,
            sample_count: samples.len().max(1),
            peak_power,
            average_power,
            min_battery_voltage: min_voltage,
            max_battery_voltage: max_voltage,
            latest: latest.clone(),
        }
    }
}
