//! Authentication discovery handlers.

use crate::auth::Principal;
use crate::error::ApiResult;
use axum::Json;
use driftsync_core::OwnerId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response describing the authenticated principal.
#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub owner_id: OwnerId,
    pub token_id: Uuid,
}

/// Report who the presented token authenticates as.
pub async fn whoami(principal: Principal) -> ApiResult<Json<WhoAmIResponse>> {
    Ok(Json(WhoAmIResponse {
        owner_id: principal.owner_id,
        token_id: principal.token_id,
    }))
}
