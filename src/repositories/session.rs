use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{clock::ExpiryPolicy, error::Result, models::session::Session};

/// Storage for session records with time-based expiry.
///
/// Implementations consult their [`ExpiryPolicy`] on every read: a record
/// older than the TTL is never returned, however late physical deletion runs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new record. Records are never updated afterwards.
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Persists `session` only if no live record holds its code, as one
    /// atomic step. Returns `false` when the code was taken.
    async fn insert_unique(&self, session: &Session, now: DateTime<Utc>) -> Result<bool>;

    /// Returns every unexpired record with `code`, oldest first.
    async fn find_by_code(&self, code: &str, now: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Physically removes expired records and reports how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Re-applies expiry metadata written under an earlier TTL.
    ///
    /// Called once at startup so a redeploy with a new TTL does not leave
    /// records governed by the old one.
    async fn rebuild_expiry(&self, now: DateTime<Utc>) -> Result<usize>;

    /// A short name for logs.
    fn backend(&self) -> &'static str;
}

/// A process-local store. Suitable for a single instance and for tests.
pub struct MemorySessionStore {
    policy: ExpiryPolicy,
    records: RwLock<Vec<Session>>,
}

impl MemorySessionStore {
    pub fn new(policy: ExpiryPolicy) -> Self {
        Self {
            policy,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Number of records physically held, expired or not.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        self.records.write().await.push(session.clone());
        Ok(())
    }

    async fn insert_unique(&self, session: &Session, now: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.write().await;
        let taken = records
            .iter()
            .any(|s| s.code == session.code && !self.policy.is_expired(s.created_at, now));
        if taken {
            return Ok(false);
        }
        records.push(session.clone());
        Ok(true)
    }

    async fn find_by_code(&self, code: &str, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|s| s.code == code && !self.policy.is_expired(s.created_at, now))
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|s| !self.policy.is_expired(s.created_at, now));
        Ok(before - records.len())
    }

    async fn rebuild_expiry(&self, _now: DateTime<Utc>) -> Result<usize> {
        // Nothing persisted outlives the process.
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
