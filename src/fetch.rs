//! HTTP scraping of exporter endpoints.

use std::time::Duration;

/// Per-request timeout for scrape GETs.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch the body of an exporter URL.
///
/// Builds a fresh client for each call so no pooled connection outlives the
/// scrape. Failures are logged (warn for connection errors, error otherwise)
/// and yield an empty string; callers treat an empty body as "no data this
/// round". The next scheduled iteration is the retry mechanism.
pub async fn fetch(url: &str) -> String {
    let client = match reqwest::Client::builder().timeout(FETCH_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return String::new();
        }
    };

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() => {
            tracing::warn!(url, error = %e, "scrape connection failed");
            return String::new();
        }
        Err(e) => {
            tracing::error!(url, error = %e, "scrape request failed");
            return String::new();
        }
    };

    let response = match response.error_for_status() {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(url, error = %e, "scrape returned error status");
            return String::new();
        }
    };

    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(url, error = %e, "failed to read scrape body");
            String::new()
        }
    }
}
