//! Applied-event idempotency log repository.

use crate::error::MetadataResult;
use crate::models::AppliedEventRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Log of event ids the server has already applied.
#[async_trait]
pub trait AppliedEventRepo {
    /// Record an applied event and its outcome.
    ///
    /// Idempotent: recording an id that is already present keeps the
    /// first entry (the replay raced us; its outcome stands).
    async fn record_applied(&self, event: &AppliedEventRow) -> MetadataResult<()>;

    /// Look up a previously applied event by id.
    async fn get_applied(&self, event_id: Uuid) -> MetadataResult<Option<AppliedEventRow>>;
}
