//! Chunk types and hashing.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata about a chunk of a larger blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// SHA-256 of the chunk contents.
    pub hash: ContentHash,
    /// Size in bytes.
    pub size: u64,
    /// Position within the blob (0-indexed chunk number).
    pub number: u32,
}

impl ChunkInfo {
    /// Create new chunk info.
    pub fn new(hash: ContentHash, size: u64, number: u32) -> Self {
        Self { hash, size, number }
    }
}

/// A chunk with its data.
#[derive(Clone)]
pub struct Chunk {
    /// The chunk hash (computed from data).
    pub hash: ContentHash,
    /// The chunk data.
    pub data: bytes::Bytes,
}

impl Chunk {
    /// Create a new chunk from data, computing the hash.
    pub fn new(data: bytes::Bytes) -> Self {
        let hash = ContentHash::compute(&data);
        Self { hash, data }
    }

    /// Verify that the data matches the expected hash.
    pub fn verify(&self, expected: &ContentHash) -> crate::Result<()> {
        if &self.hash != expected {
            return Err(crate::Error::HashMismatch {
                expected: expected.to_hex(),
                actual: self.hash.to_hex(),
            });
        }
        Ok(())
    }

    /// Get the chunk size.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("hash", &self.hash)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Split data into chunks of the given size.
///
/// The final chunk may be shorter than `chunk_size`.
pub fn chunk_data(data: &[u8], chunk_size: u64) -> Vec<ChunkInfo> {
    let chunk_size = chunk_size as usize;
    data.chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| ChunkInfo::new(ContentHash::compute(chunk), chunk.len() as u64, i as u32))
        .collect()
}

/// Number of chunks needed to cover `total_size` bytes.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u32 {
    total_size.div_ceil(chunk_size) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_data_splitting() {
        let data = vec![0u8; 100];
        let chunks = chunk_data(&data, 30);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].size, 30);
        assert_eq!(chunks[3].size, 10); // Last chunk is smaller
        assert_eq!(chunks[3].number, 3);
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(100, 30), 4);
        assert_eq!(chunk_count(90, 30), 3);
        assert_eq!(chunk_count(0, 30), 0);
    }

    #[test]
    fn test_chunk_verify() {
        let chunk = Chunk::new(bytes::Bytes::from_static(b"payload"));
        assert!(chunk.verify(&ContentHash::compute(b"payload")).is_ok());
        assert!(chunk.verify(&ContentHash::compute(b"other")).is_err());
    }
}
