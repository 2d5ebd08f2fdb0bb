//! Shared test harness for server integration tests.

use driftsync_core::config::AppConfig;
use driftsync_metadata::{MetadataStore, SqliteStore};
use driftsync_server::bootstrap::ensure_owner_token;
use driftsync_server::{AppState, create_router};
use driftsync_storage::ContentStore;
use driftsync_storage::backends::FilesystemBackend;
use std::sync::Arc;
use uuid::Uuid;

/// Raw token matching `AuthConfig::for_testing()`.
pub const TEST_TOKEN: &str = "test-owner-token";

/// A fully wired server instance over temp storage.
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp: tempfile::TempDir,
}

impl TestServer {
    pub async fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");

        let backend = FilesystemBackend::new(temp.path().join("storage"))
            .await
            .expect("storage backend");
        let config = AppConfig::for_testing();
        let content = Arc::new(ContentStore::new(
            Arc::new(backend),
            config.server.upload_timeout(),
        ));

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"))
                .await
                .expect("metadata store"),
        );

        let auth = config.auth.clone().expect("test auth config");
        ensure_owner_token(&metadata, &auth)
            .await
            .expect("bootstrap token");

        let state = AppState::new(config, content, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp: temp,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.state.metadata
    }

    pub fn owner_id(&self) -> Uuid {
        Uuid::nil()
    }
}

/// Test data helpers.
pub mod fixtures {
    /// Deterministic pseudo-random bytes.
    pub fn seeded_bytes(seed: u64, len: usize) -> bytes::Bytes {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            out.push((state >> 56) as u8);
        }
        bytes::Bytes::from(out)
    }
}
