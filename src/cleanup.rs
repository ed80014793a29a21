//! Scheduled eviction: expired sessions out of the store, expired uploads out
//! of the bucket.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::{
    clock::{Clock, ExpiryPolicy},
    error::Result,
    limiter::RateLimiter,
    repositories::session::SessionStore,
    storage::ObjectStore,
};

/// Outcome of one object sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Deletes every object under `prefix` older than the policy's TTL.
///
/// A failed delete is logged and skipped; only a failed listing aborts the
/// run.
pub async fn sweep_expired_objects(
    store: &dyn ObjectStore,
    prefix: &str,
    policy: &ExpiryPolicy,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let objects = store.list(prefix).await?;
    let mut report = SweepReport {
        scanned: objects.len(),
        ..SweepReport::default()
    };

    for object in objects
        .iter()
        .filter(|o| policy.is_expired(o.last_modified, now))
    {
        match store.delete(&object.key).await {
            Ok(()) => {
                tracing::debug!("🗑️ Deleted expired object {}", object.key);
                report.deleted += 1;
            }
            Err(e) => {
                tracing::error!("❌ Failed to delete {}: {}", object.key, e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Runs [`sweep_expired_objects`] every `every`, starting immediately.
pub fn spawn_object_sweep(
    store: Arc<dyn ObjectStore>,
    prefix: String,
    policy: ExpiryPolicy,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            tracing::info!("🧹 Sweeping {}{} for expired uploads...", store.bucket(), prefix);
            match sweep_expired_objects(store.as_ref(), &prefix, &policy, clock.now()).await {
                Ok(report) => tracing::info!(
                    "✅ Object sweep done: {} scanned, {} deleted, {} failed",
                    report.scanned,
                    report.deleted,
                    report.failed
                ),
                Err(e) => tracing::error!("❌ Object sweep failed: {}", e),
            }
        }
    })
}

/// Purges expired sessions and stale rate-limit windows every `every`.
pub fn spawn_store_reaper(
    store: Arc<dyn SessionStore>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match store.purge_expired(clock.now()).await {
                Ok(0) => tracing::debug!("🧹 No expired sessions in {} store", store.backend()),
                Ok(n) => tracing::info!("🧹 Purged {} expired sessions", n),
                Err(e) => tracing::error!("❌ Session purge failed: {}", e),
            }
            limiter.evict_stale().await;
        }
    })
}
