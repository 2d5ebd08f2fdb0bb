//! Authentication middleware.
//!
//! The server never inspects token internals: a presented bearer token is
//! hashed and looked up in the metadata store, yielding the owner it
//! authenticates as.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use driftsync_core::OwnerId;
use driftsync_metadata::TokenRepo;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct Principal {
    /// Owner the presented token authenticates as.
    pub owner_id: OwnerId,
    /// Id of the token row that matched.
    pub token_id: Uuid,
}

/// Hash a token for storage lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{b:02x}")).collect()
}

/// Extract bearer token from the Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Authentication middleware that validates tokens and attaches the
/// principal to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token_str) = extract_bearer_token(&req) {
        let token_hash = hash_token(token_str);

        if let Some(token_row) = state.metadata.get_token_by_hash(&token_hash).await? {
            req.extensions_mut().insert(Principal {
                owner_id: OwnerId::from_uuid(token_row.owner_id),
                token_id: token_row.token_id,
            });
        }
    }

    Ok(next.run(req).await)
}

/// Require authentication (a valid token must have been presented).
pub fn require_auth(req: &Request) -> ApiResult<&Principal> {
    req.extensions()
        .get::<Principal>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_sha256_hex() {
        let hash = hash_token("test-owner-token");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "18ed6880eb8fd0d8216073eb60a276861f1a271e774b0604f9c1f8027fb8521f"
        );
    }

    #[test]
    fn test_extract_bearer_token_case_insensitive() {
        let req = Request::builder()
            .header(AUTHORIZATION, "BEARER secret")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), Some("secret"));

        let req = Request::builder()
            .header(AUTHORIZATION, "Basic secret")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }
}
