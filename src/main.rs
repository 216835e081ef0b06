//! CLI for mqttswarm
//!
//! Loads the configuration, applies command-line overrides, runs the
//! harness until Ctrl-C (or Enter, or the run duration) and prints the
//! aggregate outcome.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use mqttswarm::config::{Settings, load_config};
use mqttswarm::harness::{Harness, RunReport, ShutdownSignals};
use mqttswarm::transport::RumqttConnector;
use mqttswarm::utils::{HarnessError, logging};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mqttswarm", about = "Subscribe many MQTT clients and count what they receive")]
struct Cli {
    /// Configuration file (defaults to config/default.*)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of client sessions
    #[arg(long, short = 'n')]
    clients: Option<usize>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    topic: Option<String>,
    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
    /// Also stop when a line is entered on stdin
    #[arg(long)]
    wait_for_enter: bool,
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(clients) = self.clients {
            settings.harness.clients = clients;
        }
        if let Some(host) = &self.host {
            settings.broker.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.broker.port = port;
        }
        if let Some(username) = &self.username {
            settings.broker.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            settings.broker.password = Some(password.clone());
        }
        if let Some(topic) = &self.topic {
            settings.subscription.topic = topic.clone();
        }
        if let Some(duration) = self.duration {
            settings.harness.run_duration_secs = Some(duration);
        }
        if self.wait_for_enter {
            settings.harness.wait_for_enter = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // .env entries become MQTTSWARM__* overrides; a missing file is fine.
    let _ = dotenvy::dotenv();
    logging::init(&cli.log_level);

    match run(&cli).await {
        Ok(report) => {
            print_report(&report);
            if report.summary_error.is_some() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: &Cli) -> Result<RunReport, HarnessError> {
    let mut settings = load_config(cli.config.as_deref())?;
    cli.apply(&mut settings);

    let signals = ShutdownSignals {
        ctrl_c: true,
        stdin_line: settings.harness.wait_for_enter,
        run_for: settings.harness.run_duration_secs.map(Duration::from_secs),
    };

    let harness = Harness::initialize(settings, RumqttConnector::new())?;
    let endpoint = harness.settings().endpoint()?;
    info!(
        "Starting {} client(s) against {} on topic {}",
        harness.settings().harness.clients,
        endpoint.url(),
        harness.settings().subscription.topic
    );

    Ok(harness.run(signals).await)
}

fn print_report(report: &RunReport) {
    println!(
        "Run {}: {} client(s), {} message(s) received",
        report.run_id, report.clients, report.total_messages
    );
    println!(
        "Failures: {} connect, {} subscribe, {} disconnect, {} not started",
        report.connect_failures,
        report.subscribe_failures,
        report.disconnect_failures,
        report.not_started
    );
    match &report.summary_error {
        Some(e) => println!("Summary could not be written: {e}"),
        None => println!("Summary written to {}", report.summary_file.display()),
    }
}
