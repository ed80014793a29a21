use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{RateDecision, RateLimitConfig, RateLimiter, RouteClass};
use crate::error::Result;

/// Fixed-window counters in Redis, shared by every instance.
///
/// Keys look like `rate_limit:{class}:{ip}` and expire with their window.
#[derive(Clone)]
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, config: RateLimitConfig) -> Self {
        Self { redis, config }
    }
}

fn counter_key(class: RouteClass, client: &str) -> String {
    format!("rate_limit:{}:{}", class.as_str(), client)
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, client: &str, class: RouteClass) -> Result<RateDecision> {
        let key = counter_key(class, client);
        let window_ms = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.redis.clone();

        // Create-if-absent with the window expiry, then increment, in one
        // transaction so the counter never exists without an expiry.
        let (hits, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("PX")
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        let reset_after = if pttl > 0 {
            Duration::from_millis(pttl as u64)
        } else {
            self.config.window
        };

        Ok(RateDecision::from_hits(
            self.config.budget(class),
            hits,
            reset_after,
        ))
    }

    fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
