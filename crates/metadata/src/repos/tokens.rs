//! Access token repository.

use crate::error::MetadataResult;
use crate::models::TokenRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Token rows looked up by SHA-256 hash of the presented secret.
#[async_trait]
pub trait TokenRepo {
    /// Insert a token row.
    async fn insert_token(&self, token: &TokenRow) -> MetadataResult<()>;

    /// Look up a non-revoked token by hash.
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>>;

    /// Revoke a token.
    async fn revoke_token(&self, token_id: Uuid, revoked_at: OffsetDateTime) -> MetadataResult<()>;
}
