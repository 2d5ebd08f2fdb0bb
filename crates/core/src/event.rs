//! Sync event types.
//!
//! A [`SyncEvent`] is the unit of synchronization: one observed mutation of
//! one path, immutable once created. Events travel from the change detector
//! through the outbound queue to the server and, after acceptance, out to
//! other clients over the push channel.

use crate::hash::ContentHash;
use crate::path::SyncPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a sync event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidEvent(format!("invalid event ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a client installation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a new random client ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidEvent(format!("invalid client ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the workspace owner a record belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a new random owner ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidEvent(format!("invalid owner ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of filesystem mutation an event describes.
///
/// Moves are modeled as Delete(old path) + Create(new path) by the change
/// detector, so no rename variant exists on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

impl EventKind {
    /// String form used in persisted queues and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }

    /// Parse from the persisted string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            other => Err(crate::Error::InvalidEvent(format!(
                "unknown event kind: {other}"
            ))),
        }
    }

    /// Whether this kind carries file content (hash and size).
    pub fn carries_content(&self) -> bool {
        matches!(self, Self::Create | Self::Modify)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed mutation of one path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Unique event identifier, assigned at creation.
    pub id: EventId,
    /// Workspace owner the event belongs to.
    pub owner_id: OwnerId,
    /// Client installation that observed the mutation.
    pub client_id: ClientId,
    /// Path the mutation applies to.
    pub path: SyncPath,
    /// Mutation kind.
    pub kind: EventKind,
    /// Content hash after the mutation (Create/Modify only).
    pub content_hash: Option<ContentHash>,
    /// File size after the mutation (Create/Modify only).
    pub size: Option<u64>,
    /// When the mutation was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl SyncEvent {
    /// Create a content-bearing event (Create or Modify).
    pub fn with_content(
        owner_id: OwnerId,
        client_id: ClientId,
        path: SyncPath,
        kind: EventKind,
        content_hash: ContentHash,
        size: u64,
        timestamp: OffsetDateTime,
    ) -> crate::Result<Self> {
        if !kind.carries_content() {
            return Err(crate::Error::InvalidEvent(format!(
                "{kind} events do not carry content"
            )));
        }
        Ok(Self {
            id: EventId::new(),
            owner_id,
            client_id,
            path,
            kind,
            content_hash: Some(content_hash),
            size: Some(size),
            timestamp,
        })
    }

    /// Create a delete event.
    pub fn deletion(
        owner_id: OwnerId,
        client_id: ClientId,
        path: SyncPath,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id: EventId::new(),
            owner_id,
            client_id,
            path,
            kind: EventKind::Delete,
            content_hash: None,
            size: None,
            timestamp,
        }
    }

    /// Validate the kind/content invariant.
    ///
    /// Create/Modify must carry hash and size; Delete must not.
    pub fn validate(&self) -> crate::Result<()> {
        match self.kind {
            EventKind::Create | EventKind::Modify => {
                if self.content_hash.is_none() || self.size.is_none() {
                    return Err(crate::Error::InvalidEvent(format!(
                        "{} event for {} is missing content hash or size",
                        self.kind, self.path
                    )));
                }
            }
            EventKind::Delete => {
                if self.content_hash.is_some() || self.size.is_some() {
                    return Err(crate::Error::InvalidEvent(format!(
                        "delete event for {} must not carry content",
                        self.path
                    )));
                }
            }
        }
        Ok(())
    }
}
