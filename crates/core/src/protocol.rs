//! Wire protocol types shared between client and server.

use crate::event::SyncEvent;
use crate::hash::ContentHash;
use crate::path::SyncPath;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Client-facing projection of a server-side file record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecordView {
    /// Workspace-relative path.
    pub path: SyncPath,
    /// Current content hash.
    pub content_hash: ContentHash,
    /// Current size in bytes.
    pub size: u64,
    /// Monotonically increasing version number.
    pub version_number: i64,
    /// Server-side modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    /// Whether the record is a tombstone.
    pub is_deleted: bool,
}

/// Which side of a conflict was kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The incoming event's timestamp was strictly later; it overwrote.
    NewVersionWins,
    /// The stored record's timestamp was later or equal; the event was
    /// rejected and the caller should reconcile against `record`.
    ExistingVersionWins,
}

/// Outcome of applying one sync event on the server.
///
/// Conflicts are a normal resolved outcome, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SyncOutcome {
    /// A new record was created at version 1.
    Created,
    /// An existing record was overwritten, version bumped.
    Updated,
    /// The record was tombstoned, version bumped.
    Deleted,
    /// Delete for a path with no live record; nothing happened.
    NotFound,
    /// Concurrent modification within the conflict window.
    Conflict { resolution: ConflictResolution },
}

impl SyncOutcome {
    /// Whether the server state changed (and other clients should be told).
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Updated
                | Self::Deleted
                | Self::Conflict {
                    resolution: ConflictResolution::NewVersionWins,
                }
        )
    }
}

/// Response to pushing one sync event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushEventResponse {
    /// What the server did with the event.
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    /// The record as stored after resolution.
    ///
    /// When the existing version wins a conflict this is the record the
    /// client lost to, so it can reconcile locally.
    pub record: Option<FileRecordView>,
}

/// Response to a changes-since query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Records changed since the requested timestamp, tombstones included.
    pub records: Vec<FileRecordView>,
    /// Server clock at query time; the caller's next high-water mark.
    #[serde(with = "time::serde::rfc3339")]
    pub server_timestamp: OffsetDateTime,
}

/// Request to create a chunk upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUploadRequest {
    /// Total number of chunks that will be uploaded.
    pub total_chunks: u32,
}

/// Response from creating a chunk upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUploadResponse {
    /// The upload session ID.
    pub upload_id: String,
    /// When the session expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Response to staging one chunk of an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadChunkResponse {
    /// Hash the chunk was stored under.
    pub chunk_hash: ContentHash,
}

/// Response from finalizing a chunk upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeUploadResponse {
    /// Hash of the reconstructed blob.
    pub content_hash: ContentHash,
    /// Size of the reconstructed blob in bytes.
    pub size: u64,
}

/// Response from storing a whole blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutContentResponse {
    /// Hash the blob is stored under.
    pub content_hash: ContentHash,
}

/// Messages the server sends down the push channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ServerMessage {
    /// Another client's event was accepted.
    FileEvent { event: SyncEvent },
    /// Keep-alive probe.
    Ping,
    /// Answer to a client ping.
    Pong,
    /// Generic acknowledgment.
    Ack,
}

/// Messages a client sends up the push channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientMessage {
    /// Keep-alive probe.
    Ping,
    /// Answer to a server ping.
    Pong,
}
