mod guard_metrics;
mod leader_election;
mod monitor;
mod service_configuration;
mod watchers;

use std::fs::read_to_string;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use corral_zone::{ErrorPolicy, Zone, ZoneConfig};
use tracing::info;

use crate::guard_metrics::init_metrics;
use crate::monitor::Monitor;
use crate::service_configuration::{GuardConfiguration, LoadConfiguration};

#[derive(Parser, Debug)]
#[command(name = "corral-guard", about = "Leader-elected monitor for corral zones")]
struct Args {
    /// Path to the YAML config file
    #[arg(long)]
    config_file: String,

    /// Override the ensemble address list from the config file
    #[arg(long)]
    ensemble_addrs: Option<String>,

    /// Override the Prometheus exporter http address
    #[arg(long)]
    prom_exporter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))
        .context(format!("failed to read config file {}", args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;
    let mut config: GuardConfiguration = load_config.try_into()?;

    // Command-line overrides win over the config file
    if let Some(addrs) = args.ensemble_addrs {
        config.ensemble_addrs = addrs;
    }
    if let Some(prom_exporter) = args.prom_exporter {
        config.prom_exporter = Some(prom_exporter.parse().context(format!(
            "failed to parse into socket address: {}",
            prom_exporter
        ))?);
    }

    init_metrics(config.prom_exporter);

    let zone_config = ZoneConfig::new(&config.zone_name, &config.ensemble_addrs)
        .with_session_timeout(config.session_timeout)
        .with_error_policy(ErrorPolicy::Collect);
    let zone = Zone::new(zone_config);
    zone.connect().await;
    if !zone.is_connected() {
        anyhow::bail!(
            "ensemble unreachable: {} ({})",
            config.ensemble_addrs,
            zone.errors().join("; ")
        );
    }

    info!(
        zone = %config.zone_name,
        id = %config.guard_id,
        "corral-guard starting"
    );

    let mut monitor = Monitor::new(zone, Arc::new(config), watchers::default_watchers());
    monitor.serve().await
}
