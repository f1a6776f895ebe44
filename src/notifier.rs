//! Notification rendering and delivery
//!
//! Failed deliveries are returned to the caller and never retried here.

use std::fmt;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{info, instrument};

use crate::{
    AlertDecision, Metric, config::EmailSettings, error::NotifyError, history::DailySummary,
};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, decision: &AlertDecision) -> Result<(), NotifyError>;

    async fn send_report(&self, summary: &DailySummary) -> Result<(), NotifyError>;
}

/// A rendered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

pub fn render_alert(decision: &AlertDecision) -> Rendered {
    let snapshot = &decision.snapshot;
    let (subject, headline) = match decision.metric {
        Metric::Power => (
            "🚨 Solar System Alert - High Power Detected",
            format!(
                "Output power is {:.0} W, above the limit of {:.0} W.",
                snapshot.power, decision.threshold
            ),
        ),
        Metric::BatteryVoltage => (
            "🚨 Solar System Alert - Low Battery Voltage",
            format!(
                "Battery voltage is {:.1} V, below the limit of {:.1} V.",
                snapshot.battery_voltage, decision.threshold
            ),
        ),
    };

    let body = format!(
        "[{severity}] {headline}\n\
         \n\
         Time: {time}\n\
         Power: {power:.0} W\n\
         Battery voltage: {voltage:.1} V\n\
         Energy today: {energy:.2} kWh\n\
         Status: {status}\n",
        severity = decision.severity,
        time = snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
        power = snapshot.power,
        voltage = snapshot.battery_voltage,
        energy = snapshot.energy_today,
        status = snapshot.status,
    );

    Rendered {
        subject: subject.to_string(),
        body,
    }
}

pub fn render_report(summary: &DailySummary) -> Rendered {
    let latest = &summary.latest;
    let body = format!(
        "Daily summary for {date}\n\
         \n\
         Energy today: {energy:.2} kWh\n\
         Peak power: {peak:.0} W\n\
         Average power: {average:.0} W\n\
         Battery voltage: {min_v:.1} V - {max_v:.1} V\n\
         Current status: {status}\n\
         Readings: {samples}\n",
        date = summary.date,
        energy = latest.energy_today,
        peak = summary.peak_power,
        average = summary.average_power,
        min_v = summary.min_battery_voltage,
        max_v = summary.max_battery_voltage,
        status = latest.status,
        samples = summary.sample_count,
    );

    Rendered {
        subject: format!("☀️ Solar System Daily Report - {}", summary.date),
        body,
    }
}

/// Sends notifications by SMTP to every configured recipient
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

// transport holds the credentials
impl fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

/// Port for implicit TLS; anything else uses STARTTLS
const SMTPS_PORT: u16 = 465;

impl EmailNotifier {
    pub fn new(settings: &EmailSettings) -> Result<Self, NotifyError> {
        let sender: Mailbox = settings.sender_email.parse()?;
        let recipients = settings
            .recipient_emails
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;

        let builder = if settings.smtp_port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)?
        };

        let transport = builder
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.sender_email.clone(),
                settings.sender_password.clone(),
            ))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self {
            transport,
            sender,
            recipients,
        })
    }

    /// Check that the SMTP server accepts a connection
    pub async fn test_connection(&self) -> Result<bool, NotifyError> {
        Ok(self.transport.test_connection().await?)
    }

    fn build_message(&self, rendered: Rendered) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(rendered.subject);

        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| NotifyError::Build(e.to_string()))
    }

    async fn send(&self, rendered: Rendered) -> Result<(), NotifyError> {
        let subject = rendered.subject.clone();
        let message = self.build_message(rendered)?;
        self.transport.send(message).await?;

        info!(
            recipients = self.recipients.len(),
            subject = %subject,
            "notification email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip_all, fields(metric = %decision.metric))]
    async fn send_alert(&self, decision: &AlertDecision) -> Result<(), NotifyError> {
        self.send(render_alert(decision)).await
    }

    #[instrument(skip_all, fields(date = %summary.date))]
    async fn send_report(&self, summary: &DailySummary) -> Result<(), NotifyError> {
        self.send(render_report(summary)).await
    }
}
