//! Per-client request budgets.
//!
//! Every client IP gets `limit` requests per window and route class. The
//! memory backend refills one slot every `window / limit`; the Redis backend
//! counts in fixed windows so that several instances share one budget. The
//! exchange routes get the tightest budgets since a short code is guessable.

mod memory;
mod redis_backed;

pub use memory::MemoryRateLimiter;
pub use redis_backed::RedisRateLimiter;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// The budget a route draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Deposits. The tightest budget.
    Send,
    /// Redemptions.
    Receive,
    /// Everything else.
    General,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Send => "send",
            RouteClass::Receive => "receive",
            RouteClass::General => "general",
        }
    }
}

/// Window length and per-class budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub send: u32,
    pub receive: u32,
    pub general: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            send: 10,
            receive: 30,
            general: 100,
        }
    }
}

impl RateLimitConfig {
    pub fn budget(&self, class: RouteClass) -> u32 {
        match class {
            RouteClass::Send => self.send,
            RouteClass::Receive => self.receive,
            RouteClass::General => self.general,
        }
    }

    /// Seconds until one slot of the window frees up on average:
    /// `ceil(window / limit)`.
    pub fn retry_after_secs(&self, class: RouteClass) -> u64 {
        let limit = u64::from(self.budget(class).max(1));
        self.window.as_secs().div_ceil(limit)
    }
}

/// Outcome of one budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

impl RateDecision {
    fn from_hits(limit: u32, hits: u64, reset_after: Duration) -> Self {
        let hits = u32::try_from(hits).unwrap_or(u32::MAX);
        Self {
            allowed: hits <= limit,
            limit,
            remaining: limit.saturating_sub(hits),
            reset_after,
        }
    }

    /// A decision that lets the request through without accounting for it.
    pub fn unmetered(limit: u32, window: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_after: window,
        }
    }
}

/// Counts requests per (client, route class).
///
/// Backed by process memory for a single instance, or by a shared counter
/// store when several instances serve the same clients.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one request and reports whether it fits the budget.
    async fn check(&self, client: &str, class: RouteClass) -> Result<RateDecision>;

    /// Drops bookkeeping for windows that have fully elapsed.
    async fn evict_stale(&self) {}

    fn config(&self) -> &RateLimitConfig;
}
