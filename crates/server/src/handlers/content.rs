//! Whole-blob content transfer handlers.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use bytes::Bytes;
use driftsync_core::ContentHash;
use driftsync_core::protocol::PutContentResponse;

/// Store a blob whole-body and return its content hash.
///
/// Idempotent: re-uploading bytes the server already has is deduplicated
/// by the content store.
pub async fn put_content(
    State(state): State<AppState>,
    _principal: Principal,
    body: Bytes,
) -> ApiResult<Json<PutContentResponse>> {
    let content_hash = state.content.put(body).await?;
    Ok(Json(PutContentResponse { content_hash }))
}

/// Fetch a blob by content hash.
pub async fn get_content(
    State(state): State<AppState>,
    _principal: Principal,
    Path(hash): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let hash = ContentHash::from_hex(&hash)
        .map_err(|e| ApiError::BadRequest(format!("invalid content hash: {e}")))?;

    let data = state.content.get(&hash).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    ))
}
