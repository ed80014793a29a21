//! Redis-backed session store.
//!
//! Key layout:
//!
//! ```text
//! session:{code}   → sorted set, score = createdAt (ms), member = Session JSON
//! ```
//!
//! Each key carries a Redis expiry covering its newest member, so idle codes
//! disappear on their own. Reads additionally filter by score so a record is
//! never served past the TTL even before Redis evicts it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;

use crate::{
    clock::ExpiryPolicy,
    error::{AppError, Result},
    models::session::Session,
    repositories::session::SessionStore,
};

const KEY_PREFIX: &str = "session:";
const SCAN_BATCH: usize = 200;

/// Adds a member only when the key holds none scored at or after the cutoff.
///
/// KEYS[1] = session key; ARGV = cutoff ms, created ms, member, expiry ms.
const INSERT_UNIQUE_LUA: &str = r#"
if redis.call('ZCOUNT', KEYS[1], ARGV[1], '+inf') > 0 then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
"#;

fn session_key(code: &str) -> String {
    format!("{}{}", KEY_PREFIX, code)
}

fn encode(session: &Session) -> Result<String> {
    sonic_rs::to_string(session)
        .map_err(|e| AppError::Serialization(format!("Session encode failed: {}", e)))
}

/// A session store shared by every instance pointed at the same Redis.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    policy: ExpiryPolicy,
    unique_insert: redis::Script,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager, policy: ExpiryPolicy) -> Self {
        Self {
            redis,
            policy,
            unique_insert: redis::Script::new(INSERT_UNIQUE_LUA),
        }
    }

    /// Key lifetime in milliseconds for a member created at `created_ms`.
    fn remaining_ms(&self, created_ms: i64, now: DateTime<Utc>) -> i64 {
        let ttl_ms = i64::try_from(self.policy.ttl().as_millis()).unwrap_or(i64::MAX);
        created_ms
            .saturating_add(ttl_ms)
            .saturating_sub(now.timestamp_millis())
    }

    async fn scan_session_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{}*", KEY_PREFIX))
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let member = encode(session)?;
        let key = session_key(&session.code);
        let created_ms = session.created_at.timestamp_millis();
        let expire_ms = self.remaining_ms(created_ms, session.created_at).max(1);

        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(created_ms)
            .arg(&member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(expire_ms)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!("❌ Redis ZADD failed for {}: {}", key, e);
                AppError::Redis(e)
            })?;

        tracing::debug!("Session stored under {}", key);
        Ok(())
    }

    async fn insert_unique(&self, session: &Session, now: DateTime<Utc>) -> Result<bool> {
        let member = encode(session)?;
        let key = session_key(&session.code);
        let created_ms = session.created_at.timestamp_millis();
        let cutoff = self.policy.cutoff(now).timestamp_millis();
        let expire_ms = self.remaining_ms(created_ms, now).max(1);

        let mut conn = self.redis.clone();
        let added: i64 = self
            .unique_insert
            .key(&key)
            .arg(cutoff)
            .arg(created_ms)
            .arg(&member)
            .arg(expire_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!("❌ Redis unique insert failed for {}: {}", key, e);
                AppError::Redis(e)
            })?;

        Ok(added == 1)
    }

    async fn find_by_code(&self, code: &str, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let cutoff = self.policy.cutoff(now).timestamp_millis();
        let mut conn = self.redis.clone();

        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(session_key(code))
            .arg(cutoff)
            .arg("+inf")
            .query_async(&mut conn)
            .await?;

        members
            .iter()
            .map(|raw| {
                sonic_rs::from_str::<Session>(raw)
                    .map_err(|e| AppError::Serialization(format!("Session decode failed: {}", e)))
            })
            .collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = self.policy.cutoff(now).timestamp_millis();
        let mut conn = self.redis.clone();
        let mut removed = 0usize;

        for key in self.scan_session_keys().await? {
            let count: usize = redis::cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(format!("({}", cutoff))
                .query_async(&mut conn)
                .await?;
            removed += count;
        }

        Ok(removed)
    }

    async fn rebuild_expiry(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.redis.clone();
        let mut touched = 0usize;

        for key in self.scan_session_keys().await? {
            let newest: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(&key)
                .arg(-1)
                .arg(-1)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await?;

            let Some((_, score)) = newest.first() else {
                continue;
            };

            let remaining = self.remaining_ms(*score as i64, now);
            if remaining <= 0 {
                let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            } else {
                let _: () = redis::cmd("PEXPIRE")
                    .arg(&key)
                    .arg(remaining)
                    .query_async(&mut conn)
                    .await?;
            }
            touched += 1;
        }

        Ok(touched)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
