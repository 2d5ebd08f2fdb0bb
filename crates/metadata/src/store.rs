//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AppliedEventRepo, FileRecordRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRecordRepo + AppliedEventRepo + TokenRepo + Send + Sync {
    /// Create or update the database schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint"))
}

mod sqlite_impl {
    use super::*;
    use crate::models::{AppliedEventRow, FileRecordRow, TokenRow};
    use crate::repos::records::RecordUpdate;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl FileRecordRepo for SqliteStore {
        async fn get_record(
            &self,
            owner_id: Uuid,
            path: &str,
        ) -> MetadataResult<Option<FileRecordRow>> {
            let row = sqlx::query_as::<_, FileRecordRow>(
                "SELECT * FROM file_records WHERE owner_id = ? AND path = ?",
            )
            .bind(owner_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn insert_record(&self, record: &FileRecordRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO file_records (
                    owner_id, path, content_hash, size, version_number,
                    modified_at, is_deleted, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.owner_id)
            .bind(&record.path)
            .bind(&record.content_hash)
            .bind(record.size)
            .bind(record.version_number)
            .bind(record.modified_at)
            .bind(record.is_deleted)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MetadataError::AlreadyExists(format!(
                        "record for owner {} path {}",
                        record.owner_id, record.path
                    ))
                } else {
                    e.into()
                }
            })?;
            Ok(())
        }

        async fn update_record_cas(
            &self,
            owner_id: Uuid,
            path: &str,
            expected_version: i64,
            update: RecordUpdate,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE file_records
                SET content_hash = ?, size = ?, version_number = version_number + 1,
                    modified_at = ?, is_deleted = 0, updated_at = ?
                WHERE owner_id = ? AND path = ? AND version_number = ?
                "#,
            )
            .bind(&update.content_hash)
            .bind(update.size)
            .bind(update.modified_at)
            .bind(update.updated_at)
            .bind(owner_id)
            .bind(path)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn mark_deleted_cas(
            &self,
            owner_id: Uuid,
            path: &str,
            expected_version: i64,
            modified_at: OffsetDateTime,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE file_records
                SET is_deleted = 1, version_number = version_number + 1,
                    modified_at = ?, updated_at = ?
                WHERE owner_id = ? AND path = ? AND version_number = ? AND is_deleted = 0
                "#,
            )
            .bind(modified_at)
            .bind(updated_at)
            .bind(owner_id)
            .bind(path)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_records(
            &self,
            owner_id: Uuid,
            include_deleted: bool,
        ) -> MetadataResult<Vec<FileRecordRow>> {
            let rows = if include_deleted {
                sqlx::query_as::<_, FileRecordRow>(
                    "SELECT * FROM file_records WHERE owner_id = ? ORDER BY path",
                )
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query_as::<_, FileRecordRow>(
                    "SELECT * FROM file_records WHERE owner_id = ? AND is_deleted = 0 ORDER BY path",
                )
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?
            };
            Ok(rows)
        }

        async fn list_changed_since(
            &self,
            owner_id: Uuid,
            since: OffsetDateTime,
        ) -> MetadataResult<Vec<FileRecordRow>> {
            let rows = sqlx::query_as::<_, FileRecordRow>(
                "SELECT * FROM file_records WHERE owner_id = ? AND modified_at > ? ORDER BY modified_at",
            )
            .bind(owner_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl AppliedEventRepo for SqliteStore {
        async fn record_applied(&self, event: &AppliedEventRow) -> MetadataResult<()> {
            // INSERT OR IGNORE keeps the first entry if a replay raced us.
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO applied_events (
                    event_id, owner_id, path, kind, outcome, applied_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.event_id)
            .bind(event.owner_id)
            .bind(&event.path)
            .bind(&event.kind)
            .bind(&event.outcome)
            .bind(event.applied_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_applied(&self, event_id: Uuid) -> MetadataResult<Option<AppliedEventRow>> {
            let row = sqlx::query_as::<_, AppliedEventRow>(
                "SELECT * FROM applied_events WHERE event_id = ?",
            )
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn insert_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, owner_id, token_hash, description, created_at, revoked_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(token.owner_id)
            .bind(&token.token_hash)
            .bind(&token.description)
            .bind(token.created_at)
            .bind(token.revoked_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MetadataError::AlreadyExists(format!("token {}", token.token_id))
                } else {
                    e.into()
                }
            })?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens WHERE token_hash = ? AND revoked_at IS NULL",
            )
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE tokens SET revoked_at = ? WHERE token_id = ?")
                .bind(revoked_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("token {token_id}")));
            }
            Ok(())
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS file_records (
    owner_id        BLOB NOT NULL,
    path            TEXT NOT NULL,
    content_hash    TEXT NOT NULL,
    size            INTEGER NOT NULL,
    version_number  INTEGER NOT NULL,
    modified_at     TEXT NOT NULL,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (owner_id, path)
);

CREATE INDEX IF NOT EXISTS idx_file_records_owner_modified
    ON file_records (owner_id, modified_at);

CREATE TABLE IF NOT EXISTS applied_events (
    event_id    BLOB PRIMARY KEY,
    owner_id    BLOB NOT NULL,
    path        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    token_id    BLOB PRIMARY KEY,
    owner_id    BLOB NOT NULL,
    token_hash  TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at  TEXT NOT NULL,
    revoked_at  TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppliedEventRow, FileRecordRow, TokenRow};
    use crate::repos::records::RecordUpdate;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("metadata.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_record(owner_id: Uuid, path: &str) -> FileRecordRow {
        let now = OffsetDateTime::now_utc();
        FileRecordRow {
            owner_id,
            path: path.to_string(),
            content_hash: "aa".repeat(32),
            size: 42,
            version_number: 1,
            modified_at: now,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_record() {
        let (_dir, store) = test_store().await;
        let owner = Uuid::new_v4();

        assert!(store.get_record(owner, "a.txt").await.unwrap().is_none());

        store.insert_record(&sample_record(owner, "a.txt")).await.unwrap();
        let row = store.get_record(owner, "a.txt").await.unwrap().unwrap();
        assert_eq!(row.version_number, 1);
        assert!(!row.is_deleted);

        // Duplicate path for the same owner is rejected.
        assert!(matches!(
            store.insert_record(&sample_record(owner, "a.txt")).await,
            Err(MetadataError::AlreadyExists(_))
        ));

        // Same path under a different owner is fine.
        store
            .insert_record(&sample_record(Uuid::new_v4(), "a.txt"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_cas_guards_on_version() {
        let (_dir, store) = test_store().await;
        let owner = Uuid::new_v4();
        store.insert_record(&sample_record(owner, "a.txt")).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let update = RecordUpdate {
            content_hash: "bb".repeat(32),
            size: 7,
            modified_at: now,
            updated_at: now,
        };

        // Stale expected version: no write.
        assert!(
            !store
                .update_record_cas(owner, "a.txt", 99, update.clone())
                .await
                .unwrap()
        );
        let row = store.get_record(owner, "a.txt").await.unwrap().unwrap();
        assert_eq!(row.version_number, 1);

        // Matching expected version: bump.
        assert!(
            store
                .update_record_cas(owner, "a.txt", 1, update)
                .await
                .unwrap()
        );
        let row = store.get_record(owner, "a.txt").await.unwrap().unwrap();
        assert_eq!(row.version_number, 2);
        assert_eq!(row.content_hash, "bb".repeat(32));
    }

    #[tokio::test]
    async fn test_mark_deleted_tombstones() {
        let (_dir, store) = test_store().await;
        let owner = Uuid::new_v4();
        store.insert_record(&sample_record(owner, "a.txt")).await.unwrap();

        let now = OffsetDateTime::now_utc();
        assert!(
            store
                .mark_deleted_cas(owner, "a.txt", 1, now, now)
                .await
                .unwrap()
        );

        let row = store.get_record(owner, "a.txt").await.unwrap().unwrap();
        assert!(row.is_deleted);
        assert_eq!(row.version_number, 2);

        // Deleting a tombstone is a CAS miss.
        assert!(
            !store
                .mark_deleted_cas(owner, "a.txt", 2, now, now)
                .await
                .unwrap()
        );

        // Tombstones are hidden from the live listing but kept in full.
        assert!(store.list_records(owner, false).await.unwrap().is_empty());
        assert_eq!(store.list_records(owner, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_changed_since() {
        let (_dir, store) = test_store().await;
        let owner = Uuid::new_v4();

        let mut old = sample_record(owner, "old.txt");
        old.modified_at = OffsetDateTime::now_utc() - time::Duration::hours(2);
        store.insert_record(&old).await.unwrap();

        store.insert_record(&sample_record(owner, "new.txt")).await.unwrap();

        let since = OffsetDateTime::now_utc() - time::Duration::hours(1);
        let changed = store.list_changed_since(owner, since).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].path, "new.txt");
    }

    #[tokio::test]
    async fn test_applied_event_log_keeps_first_entry() {
        let (_dir, store) = test_store().await;
        let event_id = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let entry = AppliedEventRow {
            event_id,
            owner_id: owner,
            path: "a.txt".to_string(),
            kind: "create".to_string(),
            outcome: "created".to_string(),
            applied_at: OffsetDateTime::now_utc(),
        };
        store.record_applied(&entry).await.unwrap();

        let mut replay = entry.clone();
        replay.outcome = "updated".to_string();
        store.record_applied(&replay).await.unwrap();

        let stored = store.get_applied(event_id).await.unwrap().unwrap();
        assert_eq!(stored.outcome, "created");
    }

    #[tokio::test]
    async fn test_token_lookup_and_revocation() {
        let (_dir, store) = test_store().await;
        let token_id = Uuid::new_v4();
        let token = TokenRow {
            token_id,
            owner_id: Uuid::new_v4(),
            token_hash: "cc".repeat(32),
            description: Some("test".to_string()),
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
        };
        store.insert_token(&token).await.unwrap();

        let found = store.get_token_by_hash(&token.token_hash).await.unwrap();
        assert!(found.is_some());

        store
            .revoke_token(token_id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(
            store
                .get_token_by_hash(&token.token_hash)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("metadata.db");
        let owner = Uuid::new_v4();

        {
            let store = SqliteStore::new(&db_path).await.unwrap();
            store.insert_record(&sample_record(owner, "a.txt")).await.unwrap();
        }

        let store = SqliteStore::new(&db_path).await.unwrap();
        assert!(store.get_record(owner, "a.txt").await.unwrap().is_some());
    }
}
