//! Best-effort forwarding to a VictoriaMetrics Prometheus import endpoint.

use std::time::Duration;

/// Per-request timeout for import POSTs.
const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// POST a single `topic value` line to the import URL.
///
/// Failures are logged and swallowed; the secondary sink must never affect
/// broker publishing or the scrape loop.
pub async fn push(url: &str, topic: &str, value: f64) {
    let line = format!("{} {}", topic, value);

    let client = match reqwest::Client::builder().timeout(PUSH_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return;
        }
    };

    let result = client.post(url).body(line).send().await;
    match result.and_then(|response| response.error_for_status()) {
        Ok(_) => {}
        Err(e) if e.is_connect() => {
            tracing::warn!(url, error = %e, "metrics import connection failed");
        }
        Err(e) => {
            tracing::error!(url, error = %e, "metrics import failed");
        }
    }
}
