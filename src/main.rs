//! Speedtest Monitor - continuous internet speed measurement with alerts.
//!
//! Measures download/upload/latency against speedtest.net servers, serves the
//! latest result over HTTP and posts to Slack when speeds drop below the
//! configured floors.

mod alert;
mod config;
mod discovery;
mod lifecycle;
mod probe;
mod scheduler;
mod store;
mod web;

use alert::{Alerter, SlackNotifier, WEBHOOK_TIMEOUT};
use config::{Config, ConfigSource};
use discovery::{show_servers, Discovery, DiscoveryError};
use lifecycle::{shutdown_signal, Lifecycle};
use probe::SpeedtestProbe;
use scheduler::Scheduler;
use store::{LatestResultStore, TargetSet};
use web::Server;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "speedtest-monitor")]
#[command(about = "Measure internet speed continuously and alert when it drops", long_about = None)]
#[command(version)]
struct Cli {
    /// Show available speedtest.net servers and exit
    #[arg(short, long)]
    list: bool,

    /// Server ID to test against (repeatable)
    #[arg(short, long = "server")]
    servers: Vec<u32>,

    /// Per-request timeout in seconds (default: 10)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Path to the JSON configuration file
    #[arg(short, long, env = "SPEEDMON_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // Load configuration
    let (mut cfg, source) = Config::load(cli.config.as_deref())?;
    if let Some(timeout) = cli.timeout {
        cfg.probe_timeout = timeout;
        cfg.validate()?;
    }

    // Initialize logging
    let directive: tracing_subscriber::filter::Directive =
        format!("speedtest_monitor={}", cfg.logging_level)
            .parse()
            .or_else(|_| "speedtest_monitor=info".parse())?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    match source {
        ConfigSource::File(path) => tracing::info!("Loaded configuration from {}", path.display()),
        ConfigSource::Defaults => tracing::warn!("No configuration file found, using defaults"),
    }

    // Discover servers
    let discovery = Discovery::new(cfg.probe_timeout())?;
    let client = discovery.fetch_client_info().await;
    let servers = discovery.fetch_server_list(&client).await?;

    if cli.list {
        show_servers(&servers);
        return Ok(());
    }

    let targets = TargetSet::select(&servers, &cli.servers).ok_or(DiscoveryError::NoServers)?;
    for t in &targets {
        tracing::info!(
            "Target server: [{}] {:.2}km {} ({}) by {}",
            t.id,
            t.distance_km,
            t.name,
            t.country,
            t.sponsor
        );
    }

    let probe = Arc::new(SpeedtestProbe::new(cfg.probe_timeout())?);
    let latest = Arc::new(LatestResultStore::new());

    if !cfg.server_mode {
        let scheduler = Scheduler::new(&cfg, targets, probe, latest, None);
        let result = scheduler.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let alerter = match &cfg.slack_endpoint {
        Some(endpoint) => {
            let notifier = SlackNotifier::new(endpoint, &cfg.app_name, WEBHOOK_TIMEOUT)?;
            Some(Arc::new(Alerter::new(Arc::new(notifier))))
        }
        None => {
            tracing::info!("No Slack endpoint configured, alerts disabled");
            None
        }
    };

    let scheduler = Arc::new(Scheduler::new(&cfg, targets, probe, latest, alerter.clone()));
    let listener = Server::bind(cfg.http_port).await?;

    Lifecycle::new(&cfg, scheduler, alerter)
        .run(listener, shutdown_signal())
        .await;

    Ok(())
}
