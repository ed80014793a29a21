use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::{Clock as GovernorClock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as Governor};

use super::{RateDecision, RateLimitConfig, RateLimiter, RouteClass};
use crate::error::Result;

/// A keyed GCRA limiter that reports remaining capacity on success.
type KeyedLimiter<C> =
    Governor<String, dashmap::DashMap<String, InMemoryState>, C, StateInformationMiddleware>;

/// One class's limiter and the quota it was built from.
struct ClassLimiter<C: GovernorClock> {
    limit: u32,
    period: Duration,
    limiter: KeyedLimiter<C>,
}

impl<C: GovernorClock> ClassLimiter<C> {
    fn new(limit: u32, window: Duration, clock: C) -> Self {
        let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .map(|q| q.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_second(burst));

        Self {
            limit: burst.get(),
            period: quota.replenish_interval(),
            limiter: Governor::dashmap_with_clock(quota, clock)
                .with_middleware::<StateInformationMiddleware>(),
        }
    }
}

/// Per-client budgets held in process memory.
///
/// Each route class gets its own keyed limiter: `limit` requests may burst,
/// after which one slot frees up every `window / limit`.
pub struct MemoryRateLimiter<C: GovernorClock = DefaultClock> {
    config: RateLimitConfig,
    clock: C,
    send: ClassLimiter<C>,
    receive: ClassLimiter<C>,
    general: ClassLimiter<C>,
}

impl<C: GovernorClock> std::fmt::Debug for MemoryRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRateLimiter")
            .field("config", &self.config)
            .field("tracked", &self.tracked())
            .finish()
    }
}

impl MemoryRateLimiter<DefaultClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: GovernorClock> MemoryRateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self
    where
        C: Clone,
    {
        Self {
            send: ClassLimiter::new(config.send, config.window, clock.clone()),
            receive: ClassLimiter::new(config.receive, config.window, clock.clone()),
            general: ClassLimiter::new(config.general, config.window, clock.clone()),
            config,
            clock,
        }
    }

    fn class(&self, class: RouteClass) -> &ClassLimiter<C> {
        match class {
            RouteClass::Send => &self.send,
            RouteClass::Receive => &self.receive,
            RouteClass::General => &self.general,
        }
    }

    /// Number of (class, client) keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.send.limiter.len() + self.receive.limiter.len() + self.general.limiter.len()
    }
}

#[async_trait]
impl<C> RateLimiter for MemoryRateLimiter<C>
where
    C: GovernorClock + Send + Sync + 'static,
{
    async fn check(&self, client: &str, class: RouteClass) -> Result<RateDecision> {
        let entry = self.class(class);
        let key = client.to_string();

        let decision = match entry.limiter.check_key(&key) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                RateDecision {
                    allowed: true,
                    limit: entry.limit,
                    remaining,
                    reset_after: entry.period * entry.limit.saturating_sub(remaining),
                }
            }
            Err(not_until) => RateDecision {
                allowed: false,
                limit: entry.limit,
                remaining: 0,
                reset_after: not_until.wait_time_from(self.clock.now()),
            },
        };

        Ok(decision)
    }

    async fn evict_stale(&self) {
        for entry in [&self.send, &self.receive, &self.general] {
            entry.limiter.retain_recent();
            entry.limiter.shrink_to_fit();
        }
    }

    fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
