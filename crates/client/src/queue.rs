//! Durable local state: the outbound event queue, per-path fingerprints,
//! and the sync high-water mark.
//!
//! Everything here survives process restart; the coordinator and change
//! detector hold no queue state in memory.

use crate::error::ClientResult;
use driftsync_core::{ClientId, ContentHash, EventId, EventKind, OwnerId, SyncEvent, SyncPath};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Last-known local state of one path, used for no-op suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathState {
    pub content_hash: ContentHash,
    pub size: u64,
    pub mtime_unix: i64,
}

/// A queued sync event plus its delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: SyncEvent,
    pub attempts: u32,
}

#[derive(Debug, FromRow)]
struct OutboundEventRow {
    event_id: Uuid,
    owner_id: Uuid,
    client_id: Uuid,
    path: String,
    kind: String,
    content_hash: Option<String>,
    size: Option<i64>,
    timestamp: OffsetDateTime,
    attempts: i64,
}

impl OutboundEventRow {
    fn into_queued(self) -> ClientResult<QueuedEvent> {
        let content_hash = self
            .content_hash
            .as_deref()
            .map(ContentHash::from_hex)
            .transpose()?;
        Ok(QueuedEvent {
            event: SyncEvent {
                id: EventId::from_uuid(self.event_id),
                owner_id: OwnerId::from_uuid(self.owner_id),
                client_id: ClientId::from_uuid(self.client_id),
                path: SyncPath::parse(&self.path)?,
                kind: EventKind::parse(&self.kind)?,
                content_hash,
                size: self.size.map(|s| s as u64),
                timestamp: self.timestamp,
            },
            attempts: self.attempts as u32,
        })
    }
}

/// Durable, ordered, at-least-once outbound queue.
pub struct LocalEventQueue {
    pool: Pool<Sqlite>,
}

impl LocalEventQueue {
    /// Open (or create) the state database.
    pub async fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let queue = Self { pool };
        queue.migrate().await?;
        Ok(queue)
    }

    async fn migrate(&self) -> ClientResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Append an event to the queue.
    ///
    /// At most one pending event is kept per path: multiple edits before a
    /// sync cycle collapse into "send current state", so a new pending
    /// event supersedes the previous pending one for the same path.
    /// Already-acknowledged history is never touched.
    pub async fn enqueue(&self, event: &SyncEvent) -> ClientResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM outbound_events WHERE path = ? AND status = 'pending'")
            .bind(event.path.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO outbound_events (
                event_id, owner_id, client_id, path, kind,
                content_hash, size, timestamp, status, attempts
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.owner_id.as_uuid())
        .bind(event.client_id.as_uuid())
        .bind(event.path.as_str())
        .bind(event.kind.as_str())
        .bind(event.content_hash.map(|h| h.to_hex()))
        .bind(event.size.map(|s| s as i64))
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Not-yet-acknowledged events in original insertion order.
    ///
    /// Restartable: reads from storage every time and does not consume.
    pub async fn pending(&self) -> ClientResult<Vec<QueuedEvent>> {
        let rows = sqlx::query_as::<_, OutboundEventRow>(
            r#"
            SELECT event_id, owner_id, client_id, path, kind,
                   content_hash, size, timestamp, attempts
            FROM outbound_events
            WHERE status = 'pending'
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_queued()).collect()
    }

    /// Mark an event completed after server acknowledgment. Idempotent.
    pub async fn acknowledge(&self, event_id: &EventId) -> ClientResult<()> {
        sqlx::query(
            "UPDATE outbound_events SET status = 'completed' WHERE event_id = ? AND status = 'pending'",
        )
        .bind(event_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump an event's attempt counter, returning the new count.
    pub async fn record_failure(&self, event_id: &EventId) -> ClientResult<u32> {
        sqlx::query("UPDATE outbound_events SET attempts = attempts + 1 WHERE event_id = ?")
            .bind(event_id.as_uuid())
            .execute(&self.pool)
            .await?;

        let attempts: i64 =
            sqlx::query_scalar("SELECT attempts FROM outbound_events WHERE event_id = ?")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(attempts as u32)
    }

    /// Last-known fingerprint for a path.
    pub async fn path_state(&self, path: &SyncPath) -> ClientResult<Option<PathState>> {
        let row: Option<(String, i64, i64)> = sqlx::query_as(
            "SELECT content_hash, size, mtime_unix FROM path_state WHERE path = ?",
        )
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((hash, size, mtime_unix)) => Ok(Some(PathState {
                content_hash: ContentHash::from_hex(&hash)?,
                size: size as u64,
                mtime_unix,
            })),
            None => Ok(None),
        }
    }

    /// Record a path's fingerprint.
    pub async fn set_path_state(&self, path: &SyncPath, state: &PathState) -> ClientResult<()> {
        sqlx::query(
            r#"
            INSERT INTO path_state (path, content_hash, size, mtime_unix)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size = excluded.size,
                mtime_unix = excluded.mtime_unix
            "#,
        )
        .bind(path.as_str())
        .bind(state.content_hash.to_hex())
        .bind(state.size as i64)
        .bind(state.mtime_unix)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Forget a path's fingerprint (after local deletion).
    pub async fn remove_path_state(&self, path: &SyncPath) -> ClientResult<()> {
        sqlx::query("DELETE FROM path_state WHERE path = ?")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The timestamp up to which remote changes have been applied.
    pub async fn high_water_mark(&self) -> ClientResult<Option<OffsetDateTime>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM sync_state WHERE key = 'high_water_mark'")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((raw,)) => {
                let parsed = OffsetDateTime::parse(
                    &raw,
                    &time::format_description::well_known::Rfc3339,
                )
                .map_err(|e| crate::error::ClientError::Internal(format!(
                    "corrupt high-water mark: {e}"
                )))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Advance the high-water mark.
    pub async fn set_high_water_mark(&self, mark: OffsetDateTime) -> ClientResult<()> {
        let raw = mark
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| crate::error::ClientError::Internal(e.to_string()))?;
        self.set_state("high_water_mark", &raw).await
    }

    /// Stable client id, generated on first open.
    pub async fn client_id(&self) -> ClientResult<ClientId> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM sync_state WHERE key = 'client_id'")
                .fetch_optional(&self.pool)
                .await?;
        if let Some((raw,)) = row {
            return Ok(ClientId::parse(&raw)?);
        }

        let id = ClientId::new();
        self.set_state("client_id", &id.to_string()).await?;
        Ok(id)
    }

    async fn set_state(&self, key: &str, value: &str) -> ClientResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS outbound_events (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id     BLOB NOT NULL UNIQUE,
    owner_id     BLOB NOT NULL,
    client_id    BLOB NOT NULL,
    path         TEXT NOT NULL,
    kind         TEXT NOT NULL,
    content_hash TEXT,
    size         INTEGER,
    timestamp    TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    attempts     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_outbound_events_pending
    ON outbound_events (status, seq);

CREATE TABLE IF NOT EXISTS path_state (
    path         TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    size         INTEGER NOT NULL,
    mtime_unix   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_state (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
