//! Content-addressed store with chunked upload sessions.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::{Bytes, BytesMut};
use driftsync_core::{Chunk, ChunkSession, ContentHash, UploadId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Content-addressed, deduplicated blob store.
///
/// Blobs are keyed by the SHA-256 of their bytes and never mutated after
/// first write; storing the same bytes twice is a no-op. Chunk sessions
/// stage multi-part uploads until every chunk has arrived, then reassemble
/// them into one blob in chunk-number order.
pub struct ContentStore {
    store: Arc<dyn ObjectStore>,
    sessions: Mutex<HashMap<UploadId, ChunkSession>>,
    session_ttl: time::Duration,
}

impl ContentStore {
    /// Create a content store over an object store backend.
    pub fn new(store: Arc<dyn ObjectStore>, session_ttl: time::Duration) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            session_ttl,
        }
    }

    /// Store a blob, returning its hash.
    ///
    /// Idempotent: if a blob with the same hash already exists the write is
    /// skipped. Safe under concurrent callers with the same bytes because
    /// content-addressing makes every writer's payload identical.
    pub async fn put(&self, data: Bytes) -> StorageResult<ContentHash> {
        let hash = ContentHash::compute(&data);
        let created = self.store.put_if_not_exists(&hash.to_blob_key(), data).await?;
        if !created {
            debug!(hash = %hash, "blob already stored, deduplicated");
        }
        Ok(hash)
    }

    /// Fetch a blob by hash.
    pub async fn get(&self, hash: &ContentHash) -> StorageResult<Bytes> {
        self.store.get(&hash.to_blob_key()).await.map_err(|e| match e {
            StorageError::NotFound(_) => StorageError::NotFound(hash.to_hex()),
            other => other,
        })
    }

    /// Check whether a blob exists.
    pub async fn exists(&self, hash: &ContentHash) -> StorageResult<bool> {
        self.store.exists(&hash.to_blob_key()).await
    }

    /// Begin a chunk upload session.
    pub async fn begin_session(&self, upload_id: UploadId, total_chunks: u32) -> StorageResult<()> {
        if total_chunks == 0 {
            return Err(StorageError::InvalidUpload(
                "total_chunks must be at least 1".to_string(),
            ));
        }

        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&upload_id) {
            return Err(StorageError::SessionExists(upload_id.to_string()));
        }
        sessions.insert(
            upload_id,
            ChunkSession::new(upload_id, total_chunks, self.session_ttl),
        );
        Ok(())
    }

    /// Stage one chunk of an upload.
    ///
    /// Chunks may arrive in any order and are stored content-addressed, so
    /// a chunk shared between uploads is written once.
    pub async fn put_chunk(
        &self,
        upload_id: UploadId,
        number: u32,
        data: Bytes,
    ) -> StorageResult<ContentHash> {
        // Validate the session before touching storage so an unknown or
        // out-of-range request writes nothing.
        {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&upload_id)
                .ok_or_else(|| StorageError::UnknownUpload(upload_id.to_string()))?;
            if session.is_expired() {
                return Err(StorageError::UnknownUpload(format!(
                    "{upload_id} (expired)"
                )));
            }
            if number >= session.total_chunks {
                return Err(StorageError::InvalidUpload(format!(
                    "chunk number {number} out of range (total {})",
                    session.total_chunks
                )));
            }
        }

        let chunk = Chunk::new(data);
        self.store
            .put_if_not_exists(&chunk.hash.to_chunk_key(), chunk.data)
            .await?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&upload_id)
            .ok_or_else(|| StorageError::UnknownUpload(upload_id.to_string()))?;
        session.record_chunk(number, chunk.hash)?;
        Ok(chunk.hash)
    }

    /// Chunk numbers an open session is still missing.
    pub async fn missing_chunks(&self, upload_id: UploadId) -> StorageResult<Vec<u32>> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(&upload_id)
            .ok_or_else(|| StorageError::UnknownUpload(upload_id.to_string()))?;
        Ok(session.missing_chunks())
    }

    /// Reassemble a completed session into a blob, returning its hash and
    /// size.
    ///
    /// Fails with `IncompleteUpload` if any chunk is missing; the session
    /// stays open so the remaining chunks can still arrive. On success the
    /// session is discarded.
    pub async fn finalize(&self, upload_id: UploadId) -> StorageResult<(ContentHash, u64)> {
        let ordered = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&upload_id)
                .ok_or_else(|| StorageError::UnknownUpload(upload_id.to_string()))?;
            if !session.is_complete() {
                return Err(StorageError::IncompleteUpload {
                    missing: session.missing_chunks(),
                });
            }
            session.ordered_hashes()
        };

        // Concatenate in chunk-number order regardless of arrival order.
        let mut assembled = BytesMut::new();
        for chunk_hash in &ordered {
            let data = self.store.get(&chunk_hash.to_chunk_key()).await?;
            assembled.extend_from_slice(&data);
        }

        let size = assembled.len() as u64;
        let hash = self.put(assembled.freeze()).await?;

        let mut sessions = self.sessions.lock().await;
        sessions.remove(&upload_id);
        debug!(upload_id = %upload_id, hash = %hash, size, chunks = ordered.len(), "chunk upload finalized");
        Ok((hash, size))
    }

    /// Drop a session's bookkeeping.
    ///
    /// Idempotent. Staged chunk objects stay behind; they are
    /// content-addressed and garbage collection is out of scope here.
    pub async fn abandon(&self, upload_id: UploadId) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&upload_id).is_some() {
            debug!(upload_id = %upload_id, "chunk upload abandoned");
        }
    }

    /// Drop sessions whose expiry has passed. Returns how many were
    /// removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        let swept = before - sessions.len();
        if swept > 0 {
            debug!(swept, "expired chunk upload sessions removed");
        }
        swept
    }

    /// Backend availability check.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }
}
