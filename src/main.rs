//! Bridge entry point: CLI, configuration, and lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use mqtt_bridge_prometheus::{Bridge, BridgeConfig, init_tracing};

/// MQTT bridge for Prometheus exporters.
#[derive(Parser, Debug)]
#[command(version, about)]
struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = "mqtt-bridge-prometheus.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();

    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    init_tracing(args.log_level.as_deref().or(config.logging.as_deref()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        scrapers = config.scrapers.len(),
        interval_secs = config.update_rate,
        "starting bridge"
    );

    let mut bridge = Bridge::new(config)?;

    tokio::select! {
        _ = bridge.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("received shutdown signal");
        }
    }

    bridge.shutdown().await;
    tracing::info!("goodbye");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
