use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::clock::{Clock, ExpiryPolicy, SystemClock};
use crate::config::{Config, LimiterBackend, StoreBackend};
use crate::error::Result;
use crate::limiter::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
use crate::repositories::{
    session::{MemorySessionStore, SessionStore},
    session_redis::RedisSessionStore,
};
use crate::services::exchange::Exchange;
use crate::storage::{ObjectStore, S3ObjectStore};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Deposit/Redeem. `None` when the configured store is unavailable.
    pub exchange: Option<Exchange>,
    /// Per-client request budgets.
    pub limiter: Arc<dyn RateLimiter>,
    /// The image side-channel. `None` when S3 is not configured.
    pub objects: Option<Arc<dyn ObjectStore>>,
    pub clock: Arc<dyn Clock>,
    /// Shared outbound client, built with the outbound timeout.
    pub http: reqwest::Client,
}

/// Opens a Redis connection manager, logging instead of failing.
async fn connect_redis(url: Option<&str>) -> Option<ConnectionManager> {
    let Some(url) = url else {
        tracing::error!("❌ REDIS_URL is not set");
        return None;
    };

    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("❌ Invalid REDIS_URL: {}", e);
            return None;
        }
    };

    match ConnectionManager::new(client).await {
        Ok(manager) => {
            tracing::info!("✅ Redis Connection Manager initialized");
            Some(manager)
        }
        Err(e) => {
            tracing::error!("❌ Redis unreachable: {}", e);
            None
        }
    }
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// An unreachable Redis or a missing bucket does not stop startup: the
    /// affected endpoints answer with a configuration error instead.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policy = ExpiryPolicy::new(config.session_ttl);

        let http = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .build()?;

        let needs_redis = config.store_backend == StoreBackend::Redis
            || config.limiter_backend == LimiterBackend::Redis;
        let redis = if needs_redis {
            connect_redis(config.redis_url.as_deref()).await
        } else {
            None
        };

        let store: Option<Arc<dyn SessionStore>> = match (config.store_backend, &redis) {
            (StoreBackend::Memory, _) => Some(Arc::new(MemorySessionStore::new(policy))),
            (StoreBackend::Redis, Some(redis)) => {
                Some(Arc::new(RedisSessionStore::new(redis.clone(), policy)))
            }
            (StoreBackend::Redis, None) => {
                tracing::error!("❌ Session store unavailable, exchange routes will fail");
                None
            }
        };
        let exchange = store.map(|store| {
            tracing::info!("✅ Session store: {}", store.backend());
            Exchange::new(
                store,
                config.code_format.clone(),
                clock.clone(),
                config.unique_codes,
            )
        });

        let limiter: Arc<dyn RateLimiter> = match (config.limiter_backend, redis) {
            (LimiterBackend::Redis, Some(redis)) => {
                tracing::info!("✅ Rate limiter: redis");
                Arc::new(RedisRateLimiter::new(redis, config.rate_limits))
            }
            (LimiterBackend::Redis, None) => {
                tracing::warn!("⚠️ Redis unavailable, rate limiter falls back to memory");
                Arc::new(MemoryRateLimiter::new(config.rate_limits))
            }
            (LimiterBackend::Memory, _) => {
                tracing::info!("✅ Rate limiter: memory");
                Arc::new(MemoryRateLimiter::new(config.rate_limits))
            }
        };

        let objects = match &config.object_storage {
            Some(storage) => {
                let store = S3ObjectStore::new(storage, http.clone(), clock.clone())?;
                tracing::info!(
                    "✅ Object storage: bucket {} in {}",
                    storage.bucket,
                    storage.region
                );
                Some(Arc::new(store) as Arc<dyn ObjectStore>)
            }
            None => None,
        };

        Ok(AppState {
            config: Arc::new(config.clone()),
            exchange,
            limiter,
            objects,
            clock,
            http,
        })
    }

    /// Bucket prefix that uploads go under and the sweep empties.
    pub fn temp_prefix(&self) -> &str {
        self.config
            .object_storage
            .as_ref()
            .map(|s| s.temp_prefix.as_str())
            .unwrap_or(crate::storage::DEFAULT_TEMP_PREFIX)
    }
}
