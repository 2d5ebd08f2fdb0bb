//! Chunk upload session types and lifecycle.
//!
//! A [`ChunkSession`] is transient bookkeeping for a multi-part upload:
//! it exists only between the first chunk arriving and the session being
//! finalized into a content blob or abandoned.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid upload ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transient bookkeeping for one multi-part upload.
#[derive(Clone, Debug)]
pub struct ChunkSession {
    /// Unique session identifier.
    pub id: UploadId,
    /// Total number of chunks the upload will consist of.
    pub total_chunks: u32,
    /// Chunks received so far, keyed by chunk number.
    ///
    /// A BTreeMap keeps reconstruction order independent of arrival order.
    pub received: BTreeMap<u32, ContentHash>,
    /// When the session was created.
    pub created_at: OffsetDateTime,
    /// When the session last received a chunk.
    pub updated_at: OffsetDateTime,
    /// When the session expires.
    pub expires_at: OffsetDateTime,
}

impl ChunkSession {
    /// Create a new session expecting `total_chunks` chunks.
    pub fn new(id: UploadId, total_chunks: u32, expires_in: time::Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            total_chunks,
            received: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + expires_in,
        }
    }

    /// Record the arrival of one chunk.
    ///
    /// Re-receiving a chunk number overwrites the previous hash, which is
    /// harmless for content-addressed chunks. Out-of-range numbers are
    /// rejected.
    pub fn record_chunk(&mut self, number: u32, hash: ContentHash) -> crate::Result<()> {
        if number >= self.total_chunks {
            return Err(crate::Error::ChunkOutOfRange {
                number,
                total: self.total_chunks,
            });
        }
        self.received.insert(number, hash);
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Whether every chunk `0..total_chunks` has arrived.
    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
    }

    /// Chunk numbers not yet received, in ascending order.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|n| !self.received.contains_key(n))
            .collect()
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Chunk hashes in chunk-number order.
    ///
    /// Only meaningful once [`is_complete`](Self::is_complete) holds; the
    /// BTreeMap iteration order guarantees number order regardless of how
    /// chunks arrived.
    pub fn ordered_hashes(&self) -> Vec<ContentHash> {
        self.received.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_roundtrip() {
        let id = UploadId::new();
        let parsed = UploadId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(UploadId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_session_completion_tracking() {
        let mut session = ChunkSession::new(UploadId::new(), 3, time::Duration::seconds(60));
        assert!(!session.is_complete());
        assert_eq!(session.missing_chunks(), vec![0, 1, 2]);

        session.record_chunk(2, ContentHash::compute(b"c")).unwrap();
        session.record_chunk(0, ContentHash::compute(b"a")).unwrap();
        assert_eq!(session.missing_chunks(), vec![1]);

        session.record_chunk(1, ContentHash::compute(b"b")).unwrap();
        assert!(session.is_complete());
        assert!(session.missing_chunks().is_empty());
    }

    #[test]
    fn test_ordered_hashes_ignore_arrival_order() {
        let mut session = ChunkSession::new(UploadId::new(), 3, time::Duration::seconds(60));
        session.record_chunk(1, ContentHash::compute(b"b")).unwrap();
        session.record_chunk(2, ContentHash::compute(b"c")).unwrap();
        session.record_chunk(0, ContentHash::compute(b"a")).unwrap();

        assert_eq!(
            session.ordered_hashes(),
            vec![
                ContentHash::compute(b"a"),
                ContentHash::compute(b"b"),
                ContentHash::compute(b"c"),
            ]
        );
    }

    #[test]
    fn test_record_chunk_out_of_range() {
        let mut session = ChunkSession::new(UploadId::new(), 2, time::Duration::seconds(60));
        let err = session.record_chunk(2, ContentHash::compute(b"x"));
        assert!(err.is_err());
    }

    #[test]
    fn test_session_expiry() {
        let session = ChunkSession::new(UploadId::new(), 1, time::Duration::seconds(-1));
        assert!(session.is_expired());
    }
}
