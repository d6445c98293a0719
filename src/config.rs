//! Configuration for the bridge.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Complete bridge configuration.
///
/// Loaded once at startup from a JSON5 file and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker address: `host` or `host:port` (default port 1883).
    pub mqtt_server: String,

    /// MQTT username. Empty means anonymous.
    #[serde(default)]
    pub mqtt_username: String,

    /// MQTT password.
    #[serde(default)]
    pub mqtt_password: String,

    /// Topic prefix prepended to every published topic. May be empty.
    #[serde(default)]
    pub mqtt_topic: String,

    /// Seconds between scrape iterations (default: 60).
    #[serde(default = "default_update_rate")]
    pub update_rate: u64,

    /// Log level name: "trace", "debug", "info", "warn", "error".
    /// Unrecognized values fall back to "info" with a warning.
    #[serde(default)]
    pub logging: Option<String>,

    /// Optional VictoriaMetrics Prometheus import endpoint. When set, every
    /// published sample is also POSTed there as a `topic value` line.
    #[serde(default)]
    pub victoriametrics_prom_import_url: Option<String>,

    /// Scrape targets, processed in order on every iteration.
    pub scrapers: Vec<ScraperConfig>,
}

fn default_update_rate() -> u64 {
    60
}

/// A single scrape target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// URL of the Prometheus exporter to scrape.
    pub exporter_url: String,

    /// Allow-list of metric families to publish. Maps family name to a label
    /// filter; a family absent from this map is never published. An empty
    /// label filter passes every sample of the family.
    #[serde(default)]
    pub filters: HashMap<String, LabelFilter>,
}

/// Per-family label filter: label name to allowed value(s).
pub type LabelFilter = HashMap<String, AllowedValues>;

/// One allowed label value or a set of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedValues {
    One(String),
    Any(Vec<String>),
}

impl AllowedValues {
    /// Check whether a label value is allowed.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            AllowedValues::One(v) => v == value,
            AllowedValues::Any(vs) => vs.iter().any(|v| v == value),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: BridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt_server.trim().is_empty() {
            return Err(Error::config("mqtt_server must not be empty"));
        }
        if self.update_rate == 0 {
            return Err(Error::config("update_rate must be > 0"));
        }
        for scraper in &self.scrapers {
            if scraper.exporter_url.trim().is_empty() {
                return Err(Error::config("exporter_url must not be empty"));
            }
        }
        Ok(())
    }
}
