//! Telemetry sources
//!
//! The monitor only needs [`TelemetrySource::fetch`]. [`HttpTelemetrySource`]
//! reads the latest inverter data from a JSON endpoint, either flat or
//! wrapped in the vendor's `{ "error_code", "error_msg", "data" }` envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, trace};

use crate::{TelemetrySnapshot, clock::Clock, config::TelemetrySettings, error::FetchError};

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self) -> Result<TelemetrySnapshot, FetchError>;
}

#[derive(Debug, Deserialize)]
struct TelemetryPayload {
    #[serde(alias = "pac")]
    power: Option<f64>,
    #[serde(alias = "vBat", alias = "batteryVoltage")]
    battery_voltage: Option<f64>,
    #[serde(alias = "eToday", alias = "energyToday")]
    energy_today: Option<f64>,
    status: Option<Value>,
}

pub struct HttpTelemetrySource {
    client: reqwest::Client,
    settings: TelemetrySettings,
    clock: Arc<dyn Clock>,
}

impl HttpTelemetrySource {
    pub fn new(settings: TelemetrySettings, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            settings,
            clock,
        })
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    #[instrument(skip(self), fields(device = %self.settings.device_sn))]
    async fn fetch(&self) -> Result<TelemetrySnapshot, FetchError> {
        trace!("requesting telemetry from {}", self.settings.url);

        let response = self
            .client
            .get(&self.settings.url)
            .header("token", &self.settings.api_token)
            .query(&[
                ("plant_id", self.settings.plant_id.as_str()),
                ("device_sn", self.settings.device_sn.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let snapshot = parse_snapshot(&body, self.clock.now())?;

        trace!("received telemetry: {snapshot:?}");
        Ok(snapshot)
    }
}

/// Decode and validate a telemetry body.
pub fn parse_snapshot(
    body: &str,
    timestamp: chrono::DateTime<chrono::Local>,
) -> Result<TelemetrySnapshot, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let data = match value.get("data") {
        Some(data) => {
            let code = value.get("error_code").and_then(Value::as_i64).unwrap_or(0);
            if code != 0 {
                let message = value
                    .get("error_msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(FetchError::Malformed(format!(
                    "API error {code}: {message}"
                )));
            }
            data.clone()
        }
        None => value,
    };

    let payload: TelemetryPayload =
        serde_json::from_value(data).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let power = required("power", payload.power)?;
    let battery_voltage = required("battery_voltage", payload.battery_voltage)?;
    let energy_today = required("energy_today", payload.energy_today)?;

    non_negative("power", power)?;
    non_negative("battery_voltage", battery_voltage)?;
    non_negative("energy_today", energy_today)?;

    let status = match payload.status {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => "Unknown".to_string(),
        Some(other) => other.to_string(),
    };

    Ok(TelemetrySnapshot {
        timestamp,
        power,
        battery_voltage,
        energy_today,
        status,
    })
}

fn required(field: &'static str, value: Option<f64>) -> Result<f64, FetchError> {
    value.ok_or_else(|| FetchError::Malformed(format!("missing field {field}")))
}

fn non_negative(field: &'static str, value: f64) -> Result<(), FetchError> {
    if !value.is_finite() || value < 0.0 {
        return Err(FetchError::Invalid { field, value });
    }
    Ok(())
}
