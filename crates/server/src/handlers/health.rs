//! Health check handler.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use driftsync_metadata::MetadataStore;
use serde::Serialize;

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Verify storage and metadata availability.
///
/// Intentionally unauthenticated so load balancers and probes can reach
/// it.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.content.health_check().await?;
    state.metadata.health_check().await?;
    Ok(Json(HealthResponse { status: "ok" }))
}
