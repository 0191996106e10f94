use clap::Parser;
use ha_cluster_exporter::command::SystemCommandRunner;
use ha_cluster_exporter::config::Config;
use ha_cluster_exporter::orchestrator::register_collectors;
use ha_cluster_exporter::registry::MetricsRegistry;
use ha_cluster_exporter::server;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "starting ha-cluster-exporter");
    if config.enable_timestamps {
        warn!("--enable-timestamps is deprecated by Prometheus and may be removed");
    }

    let runner = Arc::new(SystemCommandRunner::new(config.command_timeout()));
    let mut registry = MetricsRegistry::new().with_timestamps(config.enable_timestamps);
    // serving an empty endpoint would look healthy to the scraper
    if let Err(e) = register_collectors(&config.collector_paths(), runner, &mut registry) {
        error!(error = %e, "could not register collectors");
        std::process::exit(1);
    }

    server::serve(config.listen_address, &config.telemetry_path, registry).await?;
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}
