//! Stored entities.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Entity identifier.
pub type EntityId = i64;

/// One stored, addressable content version of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity identifier; listing caches are keyed by it.
    pub id: EntityId,
    /// Backend object key holding the bytes.
    pub source: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage policy the object lives under.
    pub policy_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Entity {
    /// Create an entity stamped with the current time.
    pub fn new(id: EntityId, source: impl Into<String>, size: u64, policy_id: i64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            source: source.into(),
            size,
            policy_id,
            created_at: now,
            updated_at: now,
        }
    }
}
