//! Content-addressed, deduplicated blob storage.
//!
//! The [`ObjectStore`] trait abstracts a flat key/value byte store with a
//! local filesystem implementation. [`ContentStore`] layers the
//! content-addressed contract on top: blobs keyed by the SHA-256 of their
//! bytes, write-once, deduplicated, with transient chunk sessions for
//! multi-part uploads.

pub mod backends;
pub mod content;
pub mod error;
pub mod traits;

pub use content::ContentStore;
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectMeta, ObjectStore};
