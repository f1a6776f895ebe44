//! Configuration loading and validation
//!
//! Settings come from an optional JSON file, overridden field by field by
//! environment variables. [`Config::resolve`] validates everything at once
//! and produces the immutable [`Settings`] the monitor is built from.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveTime};
use serde::Deserialize;
use tracing::trace;

use crate::{
    Metric, Severity,
    error::ConfigError,
    evaluator::{Bound, MetricPolicy},
    scheduler::parse_report_time,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "growatt")]
    pub telemetry: TelemetryConfig,
    pub email: EmailConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub url: Option<String>,
    pub api_token: Option<String>,
    pub plant_id: Option<String>,
    pub device_sn: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub sender_email: Option<String>,
    pub sender_password: Option<String>,
    pub recipient_emails: Option<Vec<String>>,
    pub enable_instant_alerts: Option<bool>,
    pub enable_daily_reports: Option<bool>,
    pub daily_report_time: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub power_threshold: Option<f64>,
    pub voltage_threshold: Option<f64>,
    pub power_duration_hours: Option<f64>,
    pub voltage_alert_interval_hours: Option<f64>,
    pub check_interval_minutes: Option<u64>,
    pub voltage_duration_hours: Option<f64>,
    pub power_alert_interval_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub file: Option<String>,
}

const DEFAULT_TELEMETRY_URL: &str = "https://openapi.growatt.com/v1/device/inverter/last_data";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 15;
const DEFAULT_REPORT_TIME: &str = "18:00";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "solar_monitor.log";

/// Validated, immutable configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub telemetry: TelemetrySettings,
    pub email: EmailSettings,
    pub monitoring: MonitoringSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub url: String,
    pub api_token: String,
    pub plant_id: String,
    pub device_sn: String,
    pub timeout: StdDuration,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub recipient_emails: Vec<String>,
    pub timeout: StdDuration,
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub power_threshold: f64,
    pub voltage_threshold: f64,
    pub power_duration: Duration,
    pub power_alert_interval: Duration,
    pub voltage_duration: Duration,
    pub voltage_alert_interval: Duration,
    pub check_interval: StdDuration,
    pub enable_instant_alerts: bool,
    pub enable_daily_reports: bool,
    pub daily_report_time: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<String>,
}

impl MonitoringSettings {
    /// Per-metric evaluation policies
    pub fn policies(&self) -> Vec<MetricPolicy> {
        vec![
            MetricPolicy {
                metric: Metric::Power,
                bound: Bound::Above(self.power_threshold),
                severity: Severity::Warning,
                sustain: self.power_duration,
                realert_after: self.power_alert_interval,
            },
            MetricPolicy {
                metric: Metric::BatteryVoltage,
                bound: Bound::Below(self.voltage_threshold),
                severity: Severity::Critical,
                sustain: self.voltage_duration,
                realert_after: self.voltage_alert_interval,
            },
        ]
    }
}

pub fn read_config_file(path: &str) -> Result<Config, ConfigError> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)?;
    trace!("loaded config from {path}");
    Ok(config)
}

/// Load `.env`, the config file (if present) and environment overrides,
/// then validate.
///
/// Runs before logging is set up, so problems are returned rather than logged.
pub fn load_settings(path: &str) -> Result<Settings, ConfigError> {
    dotenv::dotenv().ok();

    let mut config = if Path::new(path).exists() {
        read_config_file(path)?
    } else {
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.resolve()
}

fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse {value:?}")))
}

impl Config {
    /// Override fields from environment variables, looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let telemetry = &mut self.telemetry;
        if let Some(v) = var("GROWATT_API_URL") {
            telemetry.url = Some(v);
        }
        if let Some(v) = var("GROWATT_API_TOKEN") {
            telemetry.api_token = Some(v);
        }
        if let Some(v) = var("GROWATT_PLANT_ID") {
            telemetry.plant_id = Some(v);
        }
        if let Some(v) = var("GROWATT_DEVICE_SN") {
            telemetry.device_sn = Some(v);
        }

        let email = &mut self.email;
        if let Some(v) = var("SMTP_SERVER") {
            email.smtp_server = Some(v);
        }
        if let Some(v) = var("SMTP_PORT") {
            email.smtp_port = Some(parse_env("SMTP_PORT", &v)?);
        }
        if let Some(v) = var("SENDER_EMAIL") {
            email.sender_email = Some(v);
        }
        if let Some(v) = var("SENDER_PASSWORD") {
            email.sender_password = Some(v);
        }
        if let Some(v) = var("RECIPIENT_EMAILS") {
            email.recipient_emails = Some(
                v.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        if let Some(v) = var("ENABLE_INSTANT_ALERTS") {
            email.enable_instant_alerts = Some(str_to_bool(&v));
        }
        if let Some(v) = var("ENABLE_DAILY_REPORTS") {
            email.enable_daily_reports = Some(str_to_bool(&v));
        }
        if let Some(v) = var("DAILY_REPORT_TIME") {
            email.daily_report_time = Some(v);
        }

        let monitoring = &mut self.monitoring;
        let numeric = [
            ("POWER_THRESHOLD", &mut monitoring.power_threshold),
            ("VOLTAGE_THRESHOLD", &mut monitoring.voltage_threshold),
            ("POWER_DURATION_HOURS", &mut monitoring.power_duration_hours),
            (
                "VOLTAGE_ALERT_INTERVAL_HOURS",
                &mut monitoring.voltage_alert_interval_hours,
            ),
            (
                "VOLTAGE_DURATION_HOURS",
                &mut monitoring.voltage_duration_hours,
            ),
            (
                "POWER_ALERT_INTERVAL_HOURS",
                &mut monitoring.power_alert_interval_hours,
            ),
        ];
        for (key, field) in numeric {
            if let Some(v) = var(key) {
                *field = Some(parse_env(key, &v)?);
            }
        }
        if let Some(v) = var("CHECK_INTERVAL_MINUTES") {
            monitoring.check_interval_minutes = Some(parse_env("CHECK_INTERVAL_MINUTES", &v)?);
        }

        if let Some(v) = var("LOG_LEVEL") {
            self.logging.level = Some(v);
        }
        // kept even when empty, which turns file logging off
        if let Some(v) = lookup("LOG_FILE") {
            self.logging.file = Some(v);
        }

        Ok(())
    }

    /// Validate and freeze the configuration.
    ///
    /// Every missing required field is reported in a single error.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let mut missing = vec![];

        fn require<T>(value: Option<T>, name: &str, missing: &mut Vec<String>) -> Option<T> {
            if value.is_none() {
                missing.push(name.to_string());
            }
            value
        }

        let Config {
            telemetry,
            email,
            monitoring,
            logging,
        } = self;

        let api_token = require(telemetry.api_token, "telemetry.api_token", &mut missing);
        let plant_id = require(telemetry.plant_id, "telemetry.plant_id", &mut missing);
        let device_sn = require(telemetry.device_sn, "telemetry.device_sn", &mut missing);

        let smtp_server = require(email.smtp_server, "email.smtp_server", &mut missing);
        let smtp_port = require(email.smtp_port, "email.smtp_port", &mut missing);
        let sender_email = require(email.sender_email, "email.sender_email", &mut missing);
        let sender_password = require(email.sender_password, "email.sender_password", &mut missing);
        let recipient_emails = require(
            email.recipient_emails.filter(|r| !r.is_empty()),
            "email.recipient_emails",
            &mut missing,
        );

        let power_threshold = require(
            monitoring.power_threshold,
            "monitoring.power_threshold",
            &mut missing,
        );
        let voltage_threshold = require(
            monitoring.voltage_threshold,
            "monitoring.voltage_threshold",
            &mut missing,
        );
        let power_duration_hours = require(
            monitoring.power_duration_hours,
            "monitoring.power_duration_hours",
            &mut missing,
        );
        let voltage_alert_interval_hours = require(
            monitoring.voltage_alert_interval_hours,
            "monitoring.voltage_alert_interval_hours",
            &mut missing,
        );

        let (
            Some(api_token),
            Some(plant_id),
            Some(device_sn),
            Some(smtp_server),
            Some(smtp_port),
            Some(sender_email),
            Some(sender_password),
            Some(recipient_emails),
            Some(power_threshold),
            Some(voltage_threshold),
            Some(power_duration_hours),
            Some(voltage_alert_interval_hours),
        ) = (
            api_token,
            plant_id,
            device_sn,
            smtp_server,
            smtp_port,
            sender_email,
            sender_password,
            recipient_emails,
            power_threshold,
            voltage_threshold,
            power_duration_hours,
            voltage_alert_interval_hours,
        )
        else {
            return Err(ConfigError::MissingFields(missing));
        };

        let power_threshold = non_negative("monitoring.power_threshold", power_threshold)?;
        let voltage_threshold = non_negative("monitoring.voltage_threshold", voltage_threshold)?;
        let power_duration = hours(
            "monitoring.power_duration_hours",
            power_duration_hours,
        )?;
        let voltage_alert_interval = hours(
            "monitoring.voltage_alert_interval_hours",
            voltage_alert_interval_hours,
        )?;
        let voltage_duration = hours(
            "monitoring.voltage_duration_hours",
            monitoring.voltage_duration_hours.unwrap_or(0.0),
        )?;
        let power_alert_interval = hours(
            "monitoring.power_alert_interval_hours",
            monitoring
                .power_alert_interval_hours
                .unwrap_or(voltage_alert_interval_hours),
        )?;

        let check_interval_minutes = monitoring
            .check_interval_minutes
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MINUTES);
        if check_interval_minutes == 0 {
            return Err(ConfigError::invalid(
                "monitoring.check_interval_minutes",
                "must be at least 1",
            ));
        }

        let report_time = email
            .daily_report_time
            .unwrap_or_else(|| DEFAULT_REPORT_TIME.to_string());
        let daily_report_time = parse_report_time(&report_time).ok_or_else(|| {
            ConfigError::invalid(
                "email.daily_report_time",
                format!("expected HH:MM, got {report_time:?}"),
            )
        })?;

        if let Some(bad) = recipient_emails.iter().find(|r| !r.contains('@')) {
            return Err(ConfigError::invalid(
                "email.recipient_emails",
                format!("{bad:?} is not an email address"),
            ));
        }

        Ok(Settings {
            telemetry: TelemetrySettings {
                url: telemetry
                    .url
                    .unwrap_or_else(|| DEFAULT_TELEMETRY_URL.to_string()),
                api_token,
                plant_id,
                device_sn,
                timeout: StdDuration::from_secs(
                    telemetry.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            },
            email: EmailSettings {
                smtp_server,
                smtp_port,
                sender_email,
                sender_password,
                recipient_emails,
                timeout: StdDuration::from_secs(email.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
            monitoring: MonitoringSettings {
                power_threshold,
                voltage_threshold,
                power_duration,
                power_alert_interval,
                voltage_duration,
                voltage_alert_interval,
                check_interval: StdDuration::from_secs(check_interval_minutes * 60),
                enable_instant_alerts: email.enable_instant_alerts.unwrap_or(true),
                enable_daily_reports: email.enable_daily_reports.unwrap_or(true),
                daily_report_time,
            },
            logging: LoggingSettings {
                level: logging
                    .level
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
                // an empty path turns file logging off
                file: match logging.file {
                    None => Some(DEFAULT_LOG_FILE.to_string()),
                    Some(file) if file.trim().is_empty() => None,
                    Some(file) => Some(file),
                },
            },
        })
    }
}

fn non_negative(field: &str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a non-negative finite number, got {value}"),
        ));
    }
    Ok(value)
}

fn hours(field: &str, value: f64) -> Result<Duration, ConfigError> {
    let value = non_negative(field, value)?;
    let millis = (value * 3_600_000.0).round();
    if millis > i64::MAX as f64 {
        return Err(ConfigError::invalid(field, "duration is too large"));
    }
    Ok(Duration::milliseconds(millis as i64))
}
