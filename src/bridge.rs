//! The scrape-filter-publish loop.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::mqtt::MqttSession;
use crate::{exposition, fetch, filter, sink};

/// Application context: the configuration and the broker session, built once
/// at startup and driven by exactly one task.
pub struct Bridge {
    config: BridgeConfig,
    session: MqttSession,
}

impl Bridge {
    /// Build the bridge from a validated configuration.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let session = MqttSession::new(&config)?;
        Ok(Self { config, session })
    }

    /// Run the loop forever. Every iteration is a full, independent pass;
    /// the sleep between iterations adapts to iteration cost. Cancellation
    /// happens by dropping this future; run [`Bridge::shutdown`] afterwards.
    pub async fn run(&mut self) {
        let interval = Duration::from_secs(self.config.update_rate);

        loop {
            let started = Instant::now();
            self.run_iteration().await;
            let elapsed = started.elapsed();

            let sleep = remaining_sleep(interval, elapsed);
            tracing::debug!(
                took_ms = elapsed.as_millis() as u64,
                sleep_secs = sleep.as_secs_f64(),
                "iteration complete"
            );
            // An iteration that overran the interval rolls straight into the
            // next one; a slow target degrades polling frequency, nothing else.
            if !sleep.is_zero() {
                tokio::time::sleep(sleep).await;
            }
        }
    }

    /// One pass over every configured scrape target.
    async fn run_iteration(&mut self) {
        // No point fetching anything while publishing is impossible.
        if !self.session.ensure_connected().await {
            return;
        }

        for scraper in &self.config.scrapers {
            let body = fetch::fetch(&scraper.exporter_url).await;
            let families = exposition::parse(&body);
            let selected = filter::select(&families, &self.config.mqtt_topic, scraper);
            tracing::debug!(
                url = %scraper.exporter_url,
                families = families.len(),
                selected = selected.len(),
                "scraped target"
            );

            for (topic, value) in selected {
                // The interval is long enough for the connection to drop
                // mid-iteration; re-check before every sample.
                if !self.session.is_connected() && !self.session.ensure_connected().await {
                    tracing::debug!(topic = %topic, "broker unavailable, dropping sample");
                    continue;
                }

                if let Err(e) = self.session.publish(&topic, value).await {
                    tracing::debug!(topic = %topic, error = %e, "publish failed");
                }

                if let Some(url) = &self.config.victoriametrics_prom_import_url {
                    sink::push(url, &topic, value).await;
                }
            }
        }
    }

    /// Graceful teardown; disconnects the broker session if connected.
    pub async fn shutdown(&mut self) {
        self.session.disconnect().await;
    }
}

/// How long to sleep after an iteration: the configured interval minus the
/// iteration cost, floored at zero.
fn remaining_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
