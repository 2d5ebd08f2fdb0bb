//! File record repository.

use crate::error::MetadataResult;
use crate::models::FileRecordRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// New field values for a compare-and-set record update.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub content_hash: String,
    pub size: i64,
    pub modified_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// CRUD over file records keyed by `(owner_id, path)`.
///
/// All mutations of an existing record go through the compare-and-set
/// methods: the UPDATE is guarded on `version_number` matching the version
/// the caller read, so two concurrent writers to one path cannot both win
/// against a stale read. A `false` return means the guard failed and the
/// caller should re-read.
#[async_trait]
pub trait FileRecordRepo {
    /// Fetch the record for a path, tombstoned or live.
    async fn get_record(&self, owner_id: Uuid, path: &str) -> MetadataResult<Option<FileRecordRow>>;

    /// Insert a brand-new record at version 1.
    ///
    /// Fails with `AlreadyExists` if any row (live or tombstone) exists
    /// for the path.
    async fn insert_record(&self, record: &FileRecordRow) -> MetadataResult<()>;

    /// Overwrite content fields and bump the version, conditional on
    /// `expected_version` still being current. Clears the tombstone flag,
    /// so re-creation over a tombstone uses this too.
    async fn update_record_cas(
        &self,
        owner_id: Uuid,
        path: &str,
        expected_version: i64,
        update: RecordUpdate,
    ) -> MetadataResult<bool>;

    /// Tombstone the record and bump the version, conditional on
    /// `expected_version` still being current.
    async fn mark_deleted_cas(
        &self,
        owner_id: Uuid,
        path: &str,
        expected_version: i64,
        modified_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// All records for an owner, optionally including tombstones.
    async fn list_records(
        &self,
        owner_id: Uuid,
        include_deleted: bool,
    ) -> MetadataResult<Vec<FileRecordRow>>;

    /// Records modified strictly after `since`, tombstones included so
    /// clients learn about deletions.
    async fn list_changed_since(
        &self,
        owner_id: Uuid,
        since: OffsetDateTime,
    ) -> MetadataResult<Vec<FileRecordRow>>;
}
