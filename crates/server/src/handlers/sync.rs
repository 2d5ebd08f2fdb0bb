//! Sync event and change-feed handlers.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::resolver::{ConflictResolver, record_view};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use driftsync_core::{ChangesResponse, ClientId, PushEventResponse, SyncEvent};
use driftsync_metadata::FileRecordRepo;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

/// Push one sync event for resolution.
///
/// Accepted mutations are fanned out to every other connected client via
/// the notification bus. Conflicts come back as a normal response body,
/// never as an error status.
pub async fn push_event(
    State(state): State<AppState>,
    principal: Principal,
    Json(event): Json<SyncEvent>,
) -> ApiResult<Json<PushEventResponse>> {
    if event.owner_id != principal.owner_id {
        return Err(ApiError::Forbidden(
            "event owner does not match authenticated owner".to_string(),
        ));
    }
    event.validate()?;

    // Content-bearing events must reference bytes the server already has;
    // the client uploads content before sending the event.
    if let Some(hash) = &event.content_hash
        && !state.content.exists(hash).await?
    {
        return Err(ApiError::BadRequest(format!(
            "content {hash} has not been uploaded"
        )));
    }

    let resolver = ConflictResolver::new(state.metadata.clone(), state.conflict_window());
    let response = resolver.apply(&event).await?;

    info!(
        event_id = %event.id,
        path = %event.path,
        kind = %event.kind,
        outcome = ?response.outcome,
        "sync event resolved"
    );

    if response.outcome.mutated() {
        state.notifier.publish(&event, &event.client_id).await;
    }

    Ok(Json(response))
}

/// Query parameters for the changes feed.
#[derive(Debug, Deserialize)]
pub struct ChangesParams {
    /// RFC3339 timestamp; only records modified strictly after it are
    /// returned. Omitted means everything.
    pub since: Option<String>,
}

/// List records changed since a high-water mark, tombstones included.
pub async fn get_changes(
    State(state): State<AppState>,
    principal: Principal,
    Query(params): Query<ChangesParams>,
) -> ApiResult<Json<ChangesResponse>> {
    let since = match &params.since {
        Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
            .map_err(|e| ApiError::BadRequest(format!("invalid since timestamp: {e}")))?,
        None => OffsetDateTime::UNIX_EPOCH,
    };

    let server_timestamp = OffsetDateTime::now_utc();
    let rows = state
        .metadata
        .list_changed_since(*principal.owner_id.as_uuid(), since)
        .await?;

    let records = rows
        .iter()
        .map(record_view)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(ChangesResponse {
        records,
        server_timestamp,
    }))
}

/// Heartbeat request body.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub client_id: ClientId,
}

/// Heartbeat response body.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub server_timestamp: OffsetDateTime,
}

/// Client liveness probe, sent once per sync cycle.
pub async fn heartbeat(
    principal: Principal,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    tracing::debug!(
        owner_id = %principal.owner_id,
        client_id = %request.client_id,
        "heartbeat"
    );
    Ok(Json(HeartbeatResponse {
        status: "ok",
        server_timestamp: OffsetDateTime::now_utc(),
    }))
}
