use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One deposited piece of content.
///
/// Written once at creation and never updated. For image sessions `content`
/// holds an object-storage key rather than the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Distinguishes records that share a code.
    pub id: Uuid,
    /// The opaque text payload.
    pub content: String,
    /// The short code used to redeem the content.
    pub code: String,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(content: String, code: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            code,
            created_at,
        }
    }
}
