//! MQTT bridge for Prometheus exporters.
//!
//! Periodically scrapes Prometheus text-exposition endpoints, filters the
//! samples against a per-target allow-list, and republishes matching samples
//! as individual MQTT messages. Optionally forwards each published sample to
//! a VictoriaMetrics Prometheus import endpoint.
//!
//! - [`config`] - Typed configuration (JSON5 format)
//! - [`exposition`] - Prometheus text exposition parser
//! - [`fetch`] - HTTP scraping of exporter endpoints
//! - [`filter`] - Sample filtering and topic flattening
//! - [`mqtt`] - Broker session lifecycle (connect, availability, last will)
//! - [`sink`] - Best-effort VictoriaMetrics forwarding
//! - [`bridge`] - The scrape-filter-publish loop
//! - [`error`] - Error types

pub mod bridge;
pub mod config;
pub mod error;
pub mod exposition;
pub mod fetch;
pub mod filter;
pub mod mqtt;
pub mod sink;

// Re-export commonly used types at the crate root
pub use bridge::Bridge;
pub use config::{BridgeConfig, ScraperConfig};
pub use error::{Error, Result};
pub use exposition::{MetricFamily, Sample};
pub use mqtt::MqttSession;

/// Initialize tracing from an optional level name.
///
/// The level name is case-insensitive ("debug", "INFO", ...). An unrecognized
/// level logs a warning and leaves the default `info` level in place; it is
/// never fatal. `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

    let mut unrecognized: Option<&str> = None;
    let default_level = match level {
        Some(name) => match name.parse::<LevelFilter>() {
            Ok(parsed) => parsed,
            Err(_) => {
                unrecognized = Some(name);
                LevelFilter::INFO
            }
        },
        None => LevelFilter::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;

    if let Some(name) = unrecognized {
        tracing::warn!(level = %name, "unknown logging level, keeping default");
    }

    Ok(())
}
