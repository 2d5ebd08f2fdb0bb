//! Authoritative per-owner, per-path file metadata.
//!
//! The [`MetadataStore`] trait combines the repositories the sync engine
//! needs: versioned file records with compare-and-set updates, the
//! applied-event idempotency log, and access tokens. [`SqliteStore`] is the
//! bundled implementation.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{AppliedEventRepo, FileRecordRepo, TokenRepo};
pub use store::{MetadataStore, SqliteStore};
