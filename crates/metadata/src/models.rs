//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Authoritative file record.
///
/// At most one row exists per `(owner_id, path)`. Deletes tombstone the
/// row (`is_deleted = true`) rather than removing it, so later
/// re-creation is distinguishable from a stale duplicate.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecordRow {
    pub owner_id: Uuid,
    pub path: String,
    /// Hash of the current content. Tombstones keep the hash the record
    /// had when it was deleted.
    pub content_hash: String,
    pub size: i64,
    /// Bumps by one on every accepted mutation; never reused.
    pub version_number: i64,
    pub modified_at: OffsetDateTime,
    pub is_deleted: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One entry of the applied-event idempotency log.
///
/// The client queue is at-least-once, so the server records every event
/// id it has applied together with the outcome; a replayed id returns the
/// recorded outcome instead of mutating again.
#[derive(Debug, Clone, FromRow)]
pub struct AppliedEventRow {
    pub event_id: Uuid,
    pub owner_id: Uuid,
    pub path: String,
    pub kind: String,
    pub outcome: String,
    pub applied_at: OffsetDateTime,
}

/// Access token record. Only the SHA-256 of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub owner_id: Uuid,
    pub token_hash: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}
