use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    clock::Clock,
    crypto::code::CodeFormat,
    error::{AppError, Result},
    models::session::Session,
    repositories::session::SessionStore,
    validation::exchange::validate_code,
};

/// Regeneration attempts before a deposit gives up on finding a free code.
const UNIQUE_CODE_ATTEMPTS: usize = 8;

/// Deposit and Redeem over a [`SessionStore`].
///
/// A session moves from created to readable to expired. Redeeming never
/// consumes it: any number of reads succeed until the TTL elapses.
#[derive(Clone)]
pub struct Exchange {
    store: Arc<dyn SessionStore>,
    format: CodeFormat,
    clock: Arc<dyn Clock>,
    unique_codes: bool,
}

impl Exchange {
    pub fn new(
        store: Arc<dyn SessionStore>,
        format: CodeFormat,
        clock: Arc<dyn Clock>,
        unique_codes: bool,
    ) -> Self {
        Self {
            store,
            format,
            clock,
            unique_codes,
        }
    }

    pub fn format(&self) -> &CodeFormat {
        &self.format
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Stores `content` under a fresh code and returns the new session.
    ///
    /// Unless unique codes are enabled, the code may collide with a live
    /// session; redemption then returns whichever record the store lists first.
    pub async fn deposit(&self, content: String) -> Result<Session> {
        let now = self.clock.now();
        let session = if self.unique_codes {
            self.insert_with_free_code(content, now).await?
        } else {
            let session = Session::new(content, self.format.generate(), now);
            self.store.insert(&session).await?;
            session
        };

        tracing::info!(
            "✅ Session deposited in {} store ({} bytes)",
            self.store.backend(),
            session.content.len()
        );
        Ok(session)
    }

    /// Exchanges a code for its session.
    ///
    /// Malformed codes fail before the store is queried. Unknown and expired
    /// codes both yield [`AppError::NotFound`].
    pub async fn redeem(&self, code: Option<&str>) -> Result<Session> {
        validate_code(code, &self.format)?;
        let code = code.unwrap_or_default();

        let mut matches = self.store.find_by_code(code, self.clock.now()).await?;
        if matches.len() > 1 {
            tracing::debug!("{} live sessions share one code, serving the oldest", matches.len());
        }

        if matches.is_empty() {
            return Err(AppError::NotFound);
        }
        Ok(matches.swap_remove(0))
    }

    async fn insert_with_free_code(&self, content: String, now: DateTime<Utc>) -> Result<Session> {
        let mut session = Session::new(content, self.format.generate(), now);
        for attempt in 1..=UNIQUE_CODE_ATTEMPTS {
            if self.store.insert_unique(&session, now).await? {
                return Ok(session);
            }
            if attempt < UNIQUE_CODE_ATTEMPTS {
                session.code = self.format.generate();
            }
        }

        Err(AppError::Internal(format!(
            "no free code after {} attempts, code space exhausted",
            UNIQUE_CODE_ATTEMPTS
        )))
    }
}
