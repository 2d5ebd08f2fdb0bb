//! Core domain types and shared logic for the driftsync engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and object keys
//! - Sync paths and sync events
//! - Chunk metadata and chunk upload sessions
//! - Wire protocol types shared by client and server
//! - Configuration for both binaries

pub mod chunk;
pub mod config;
pub mod error;
pub mod event;
pub mod hash;
pub mod path;
pub mod protocol;
pub mod upload;

pub use chunk::{Chunk, ChunkInfo, chunk_count, chunk_data};
pub use error::{Error, Result};
pub use event::{ClientId, EventId, EventKind, OwnerId, SyncEvent};
pub use hash::{ContentHash, ContentHasher};
pub use path::SyncPath;
pub use protocol::{
    ChangesResponse, ClientMessage, ConflictResolution, FileRecordView, PushEventResponse,
    ServerMessage, SyncOutcome,
};
pub use upload::{ChunkSession, UploadId};

/// Default chunk size for multi-part uploads: 5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum chunk size: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Minimum chunk size: 256 KiB
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;
