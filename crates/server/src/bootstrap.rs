//! Startup bootstrap tasks.

use anyhow::Result;
use driftsync_core::config::AuthConfig;
use driftsync_metadata::models::TokenRow;
use driftsync_metadata::{MetadataStore, TokenRepo};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure the configured owner's access token exists.
///
/// The config carries only the SHA-256 of the token. If a row with that
/// hash already exists nothing happens; otherwise a fresh row is created
/// so the owner can authenticate immediately after first start.
pub async fn ensure_owner_token(
    metadata: &Arc<dyn MetadataStore>,
    auth: &AuthConfig,
) -> Result<()> {
    if auth.token_hash.len() != 64 || !auth.token_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("auth.token_hash must be 64 hex characters (SHA-256)");
    }

    if metadata.get_token_by_hash(&auth.token_hash).await?.is_some() {
        tracing::debug!(owner_id = %auth.owner_id, "owner token already present");
        return Ok(());
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        owner_id: auth.owner_id,
        token_hash: auth.token_hash.clone(),
        description: auth.token_description.clone(),
        created_at: OffsetDateTime::now_utc(),
        revoked_at: None,
    };
    metadata.insert_token(&token).await?;
    tracing::info!(owner_id = %auth.owner_id, token_id = %token.token_id, "owner token bootstrapped");
    Ok(())
}
