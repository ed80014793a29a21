use std::time::Duration;

use tokio::task::JoinHandle;

/// Pings `url` every `every` so an idle hosted instance is not put to sleep.
///
/// The first ping waits one full interval; the server has only just started.
pub fn spawn_keepalive(http: reqwest::Client, url: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = tokio::time::interval_at(start, every);
        loop {
            ticker.tick().await;
            match http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("💓 Keepalive {} -> {}", url, response.status());
                }
                Ok(response) => {
                    tracing::warn!("⚠️ Keepalive {} answered {}", url, response.status());
                }
                Err(e) => {
                    tracing::warn!("⚠️ Keepalive {} failed (timeout: {}): {}", url, e.is_timeout(), e);
                }
            }
        }
    })
}
