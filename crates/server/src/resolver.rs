//! Server-side conflict resolution.
//!
//! Every incoming sync event is evaluated against the current file record
//! for its `(owner, path)`. All mutations go through compare-and-set
//! updates keyed on the version the resolver read, so concurrent writers
//! to one path serialize without blocking writers to other paths.

use crate::error::{ApiError, ApiResult};
use driftsync_core::{
    ConflictResolution, ContentHash, EventKind, FileRecordView, PushEventResponse, SyncEvent,
    SyncOutcome, SyncPath,
};
use driftsync_metadata::models::{AppliedEventRow, FileRecordRow};
use driftsync_metadata::repos::records::RecordUpdate;
use driftsync_metadata::{AppliedEventRepo, FileRecordRepo, MetadataStore};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Bounded retries for the compare-and-set loop. A miss means another
/// writer touched the same path between our read and write; re-reading and
/// re-evaluating is cheap, and contention on one path is short-lived.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Applies sync events to the authoritative record store.
pub struct ConflictResolver {
    metadata: Arc<dyn MetadataStore>,
    conflict_window: time::Duration,
}

impl ConflictResolver {
    /// Create a resolver with the given conflict window.
    pub fn new(metadata: Arc<dyn MetadataStore>, conflict_window: time::Duration) -> Self {
        Self {
            metadata,
            conflict_window,
        }
    }

    /// Apply one event, returning the resolution outcome and the record as
    /// stored afterwards.
    ///
    /// Idempotent over event ids: the outbound client queue is
    /// at-least-once, so a replayed id returns the outcome recorded for
    /// its first application instead of mutating again.
    pub async fn apply(&self, event: &SyncEvent) -> ApiResult<PushEventResponse> {
        event.validate()?;

        let owner = *event.owner_id.as_uuid();
        let path = event.path.as_str();

        if let Some(applied) = self.metadata.get_applied(*event.id.as_uuid()).await? {
            debug!(event_id = %event.id, outcome = %applied.outcome, "replayed event, returning recorded outcome");
            let record = self.current_view(owner, path).await?;
            return Ok(PushEventResponse {
                outcome: parse_outcome(&applied.outcome)?,
                record,
            });
        }

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            if attempts > MAX_CAS_ATTEMPTS {
                warn!(path, attempts, "conflict resolution retries exhausted");
                return Err(ApiError::Internal(format!(
                    "could not apply event for {path} after {MAX_CAS_ATTEMPTS} attempts"
                )));
            }

            let current = self.metadata.get_record(owner, path).await?;
            match self.try_apply(event, current.as_ref()).await? {
                Some(outcome) => break outcome,
                // CAS miss: another writer won against our read.
                None => continue,
            }
        };

        self.metadata
            .record_applied(&AppliedEventRow {
                event_id: *event.id.as_uuid(),
                owner_id: owner,
                path: path.to_string(),
                kind: event.kind.as_str().to_string(),
                outcome: outcome_str(&outcome).to_string(),
                applied_at: OffsetDateTime::now_utc(),
            })
            .await?;

        let record = self.current_view(owner, path).await?;
        Ok(PushEventResponse { outcome, record })
    }

    /// One pass of the resolution state machine.
    ///
    /// Returns `None` when a compare-and-set missed and the caller should
    /// re-read and retry.
    async fn try_apply(
        &self,
        event: &SyncEvent,
        current: Option<&FileRecordRow>,
    ) -> ApiResult<Option<SyncOutcome>> {
        let owner = *event.owner_id.as_uuid();
        let path = event.path.as_str();
        let now = OffsetDateTime::now_utc();

        match (current, event.kind) {
            (None, EventKind::Delete) => Ok(Some(SyncOutcome::NotFound)),

            (None, _) => {
                let record = FileRecordRow {
                    owner_id: owner,
                    path: path.to_string(),
                    content_hash: event.content_hash.map(|h| h.to_hex()).unwrap_or_default(),
                    size: event.size.unwrap_or(0) as i64,
                    version_number: 1,
                    modified_at: event.timestamp,
                    is_deleted: false,
                    created_at: now,
                    updated_at: now,
                };
                match self.metadata.insert_record(&record).await {
                    Ok(()) => Ok(Some(SyncOutcome::Created)),
                    // Concurrent creation of the same path: retry against
                    // the row that beat us.
                    Err(driftsync_metadata::MetadataError::AlreadyExists(_)) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }

            (Some(record), EventKind::Delete) => {
                if record.is_deleted {
                    // Already a tombstone; nothing to delete.
                    return Ok(Some(SyncOutcome::NotFound));
                }
                let changed = self
                    .metadata
                    .mark_deleted_cas(owner, path, record.version_number, event.timestamp, now)
                    .await?;
                Ok(changed.then_some(SyncOutcome::Deleted))
            }

            (Some(record), _) => {
                let incoming_hash = event
                    .content_hash
                    .ok_or_else(|| ApiError::BadRequest("event missing content hash".to_string()))?;
                let update = RecordUpdate {
                    content_hash: incoming_hash.to_hex(),
                    size: event.size.unwrap_or(0) as i64,
                    modified_at: event.timestamp,
                    updated_at: now,
                };

                if record.is_deleted {
                    // Re-creation over a tombstone; version keeps climbing.
                    let changed = self
                        .metadata
                        .update_record_cas(owner, path, record.version_number, update)
                        .await?;
                    return Ok(changed.then_some(SyncOutcome::Created));
                }

                if record.content_hash == incoming_hash.to_hex() {
                    // Same content; refresh the timestamp, no conflict.
                    let changed = self
                        .metadata
                        .update_record_cas(owner, path, record.version_number, update)
                        .await?;
                    return Ok(changed.then_some(SyncOutcome::Updated));
                }

                let gap = if event.timestamp > record.modified_at {
                    event.timestamp - record.modified_at
                } else {
                    record.modified_at - event.timestamp
                };

                if gap < self.conflict_window {
                    // Concurrent edit: last write wins by timestamp.
                    if event.timestamp > record.modified_at {
                        let changed = self
                            .metadata
                            .update_record_cas(owner, path, record.version_number, update)
                            .await?;
                        Ok(changed.then_some(SyncOutcome::Conflict {
                            resolution: ConflictResolution::NewVersionWins,
                        }))
                    } else {
                        // The stored record stands; report it so the
                        // caller can reconcile locally.
                        Ok(Some(SyncOutcome::Conflict {
                            resolution: ConflictResolution::ExistingVersionWins,
                        }))
                    }
                } else {
                    // Outside the window this is an ordinary update.
                    let changed = self
                        .metadata
                        .update_record_cas(owner, path, record.version_number, update)
                        .await?;
                    Ok(changed.then_some(SyncOutcome::Updated))
                }
            }
        }
    }

    /// Current record for a path, as a wire view.
    async fn current_view(&self, owner: uuid::Uuid, path: &str) -> ApiResult<Option<FileRecordView>> {
        match self.metadata.get_record(owner, path).await? {
            Some(row) => Ok(Some(record_view(&row)?)),
            None => Ok(None),
        }
    }
}

/// Convert a database row into the client-facing view.
pub fn record_view(row: &FileRecordRow) -> ApiResult<FileRecordView> {
    Ok(FileRecordView {
        path: SyncPath::parse(&row.path)?,
        content_hash: ContentHash::from_hex(&row.content_hash)?,
        size: row.size as u64,
        version_number: row.version_number,
        modified_at: row.modified_at,
        is_deleted: row.is_deleted,
    })
}

fn outcome_str(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Created => "created",
        SyncOutcome::Updated => "updated",
        SyncOutcome::Deleted => "deleted",
        SyncOutcome::NotFound => "not_found",
        SyncOutcome::Conflict {
            resolution: ConflictResolution::NewVersionWins,
        } => "conflict_new_version_wins",
        SyncOutcome::Conflict {
            resolution: ConflictResolution::ExistingVersionWins,
        } => "conflict_existing_version_wins",
    }
}

fn parse_outcome(s: &str) -> ApiResult<SyncOutcome> {
    match s {
        "created" => Ok(SyncOutcome::Created),
        "updated" => Ok(SyncOutcome::Updated),
        "deleted" => Ok(SyncOutcome::Deleted),
        "not_found" => Ok(SyncOutcome::NotFound),
        "conflict_new_version_wins" => Ok(SyncOutcome::Conflict {
            resolution: ConflictResolution::NewVersionWins,
        }),
        "conflict_existing_version_wins" => Ok(SyncOutcome::Conflict {
            resolution: ConflictResolution::ExistingVersionWins,
        }),
        other => Err(ApiError::Internal(format!(
            "unknown applied outcome: {other}"
        ))),
    }
}
