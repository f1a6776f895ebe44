use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{Parser, Subcommand};
use solar_alert::{
    AlertDecision, Metric, Severity, TelemetrySnapshot,
    clock::{Clock, SystemClock},
    config::{LoggingSettings, Settings, load_settings},
    monitor::{Monitor, MonitorHandle, exit_status},
    notifier::{EmailNotifier, Notifier},
    source::HttpTelemetrySource,
    state::MemoryStateStore,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file
    #[arg(short, long = "config", default_value = "config.json")]
    file: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Poll on the configured interval until interrupted (default)
    Run,
    /// Run a single pass; exits non-zero if telemetry could not be fetched
    Once,
    /// Check the SMTP connection and send a sample alert
    TestEmail {
        /// Only check the connection
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the configuration and print a summary
    CheckConfig,
}

fn init(logging: &LoggingSettings) -> anyhow::Result<()> {
    let level = logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let filter = filter::Targets::new()
        .with_target("solar_alert", level)
        .with_default(LevelFilter::WARN);

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let settings = load_settings(&args.file)?;

    init(&settings.logging)?;
    trace!("started with args: {args:?}");
    info!(
        instant_alerts = settings.monitoring.enable_instant_alerts,
        daily_reports = settings.monitoring.enable_daily_reports,
        "configuration loaded"
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Once => once(settings).await,
        Command::TestEmail { dry_run } => test_email(settings, dry_run).await,
        Command::CheckConfig => {
            print_summary(&settings);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_monitor(settings: &Settings) -> anyhow::Result<Monitor> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = HttpTelemetrySource::new(settings.telemetry.clone(), clock.clone())
        .context("failed to set up telemetry source")?;
    let notifier =
        EmailNotifier::new(&settings.email).context("failed to set up email notifier")?;

    Ok(Monitor::new(
        settings.monitoring.clone(),
        Box::new(source),
        Box::new(notifier),
        Box::new(MemoryStateStore::new()),
        clock,
    ))
}

async fn run(settings: Settings) -> anyhow::Result<ExitCode> {
    let monitor = build_monitor(&settings)?;
    let (handle, mut task) = MonitorHandle::spawn(monitor);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping after the current pass");
            handle.shutdown().await?;
            task.await?;
        }
        result = &mut task => {
            result?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn once(settings: Settings) -> anyhow::Result<ExitCode> {
    let mut monitor = build_monitor(&settings)?;

    let result = monitor.run_once().await;
    match &result {
        Ok(report) => info!(
            alerts_sent = report.alerts_sent(),
            report_sent = report.report.is_some(),
            "monitoring check completed"
        ),
        Err(e) => error!("monitoring check failed: {e}"),
    }

    Ok(ExitCode::from(exit_status(&result)))
}

async fn test_email(settings: Settings, dry_run: bool) -> anyhow::Result<ExitCode> {
    let notifier =
        EmailNotifier::new(&settings.email).context("failed to set up email notifier")?;

    if !notifier.test_connection().await? {
        error!("SMTP server {} refused the connection", settings.email.smtp_server);
        return Ok(ExitCode::FAILURE);
    }
    info!("SMTP connection successful");

    if dry_run {
        return Ok(ExitCode::SUCCESS);
    }

    let decision = AlertDecision {
        metric: Metric::Power,
        severity: Severity::Warning,
        threshold: settings.monitoring.power_threshold,
        snapshot: TelemetrySnapshot {
            timestamp: SystemClock.now(),
            power: settings.monitoring.power_threshold + 50.0,
            battery_voltage: settings.monitoring.voltage_threshold,
            energy_today: 15.3,
            status: "Testing Alert System".to_string(),
        },
        suppressed: false,
    };

    notifier.send_alert(&decision).await?;
    info!(
        recipients = ?settings.email.recipient_emails,
        "test alert sent"
    );

    Ok(ExitCode::SUCCESS)
}

fn print_summary(settings: &Settings) {
    let monitoring = &settings.monitoring;
    println!("Configuration OK");
    println!("Device: {} (plant {})", settings.telemetry.device_sn, settings.telemetry.plant_id);
    println!("Telemetry endpoint: {}", settings.telemetry.url);
    println!("Email sender: {}", settings.email.sender_email);
    println!("Recipients: {}", settings.email.recipient_emails.join(", "));
    println!(
        "Power threshold: {}W sustained for {} min",
        monitoring.power_threshold,
        monitoring.power_duration.num_minutes()
    );
    println!(
        "Voltage threshold: {}V sustained for {} min",
        monitoring.voltage_threshold,
        monitoring.voltage_duration.num_minutes()
    );
    println!(
        "Re-alert after: power {} min, voltage {} min",
        monitoring.power_alert_interval.num_minutes(),
        monitoring.voltage_alert_interval.num_minutes()
    );
    println!("Check interval: {:?}", monitoring.check_interval);
    println!(
        "Instant alerts: {}, daily reports: {} at {}",
        monitoring.enable_instant_alerts,
        monitoring.enable_daily_reports,
        monitoring.daily_report_time.format("%H:%M")
    );
}
