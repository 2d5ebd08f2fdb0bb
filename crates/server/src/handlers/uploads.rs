//! Chunked upload session handlers.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use bytes::Bytes;
use driftsync_core::UploadId;
use driftsync_core::protocol::{
    CreateUploadRequest, CreateUploadResponse, FinalizeUploadResponse, UploadChunkResponse,
};
use time::OffsetDateTime;
use tracing::info;

/// Open a chunk upload session.
pub async fn create_upload(
    State(state): State<AppState>,
    _principal: Principal,
    Json(request): Json<CreateUploadRequest>,
) -> ApiResult<Json<CreateUploadResponse>> {
    let max = state.config.server.max_chunks_per_upload;
    if request.total_chunks == 0 || request.total_chunks > max {
        return Err(ApiError::BadRequest(format!(
            "total_chunks must be between 1 and {max}"
        )));
    }

    let upload_id = UploadId::new();
    state
        .content
        .begin_session(upload_id, request.total_chunks)
        .await?;

    info!(upload_id = %upload_id, total_chunks = request.total_chunks, "chunk upload session created");

    Ok(Json(CreateUploadResponse {
        upload_id: upload_id.to_string(),
        expires_at: OffsetDateTime::now_utc() + state.config.server.upload_timeout(),
    }))
}

/// Stage one chunk of an open session. Chunks may arrive in any order.
pub async fn upload_chunk(
    State(state): State<AppState>,
    _principal: Principal,
    Path((upload_id, chunk_number)): Path<(String, u32)>,
    body: Bytes,
) -> ApiResult<Json<UploadChunkResponse>> {
    let upload_id = UploadId::parse(&upload_id)?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("empty chunk body".to_string()));
    }
    if body.len() as u64 > state.config.server.max_chunk_size {
        return Err(ApiError::BadRequest(format!(
            "chunk exceeds maximum size of {} bytes",
            state.config.server.max_chunk_size
        )));
    }

    let chunk_hash = state.content.put_chunk(upload_id, chunk_number, body).await?;
    Ok(Json(UploadChunkResponse { chunk_hash }))
}

/// Reassemble a completed session into a content blob.
pub async fn finalize_upload(
    State(state): State<AppState>,
    _principal: Principal,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<FinalizeUploadResponse>> {
    let upload_id = UploadId::parse(&upload_id)?;
    let (content_hash, size) = state.content.finalize(upload_id).await?;

    info!(upload_id = %upload_id, content_hash = %content_hash, size, "chunk upload finalized");

    Ok(Json(FinalizeUploadResponse { content_hash, size }))
}

/// Abandon an open session, freeing its bookkeeping.
pub async fn abandon_upload(
    State(state): State<AppState>,
    _principal: Principal,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let upload_id = UploadId::parse(&upload_id)?;
    state.content.abandon(upload_id).await;
    Ok(StatusCode::NO_CONTENT)
}
