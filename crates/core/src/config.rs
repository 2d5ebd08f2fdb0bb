//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Conflict window in seconds.
    ///
    /// Two differing writes to the same path whose timestamps land within
    /// this window are treated as a conflict and resolved last-write-wins;
    /// outside it the later write is an ordinary update. Fixed policy
    /// value, not derived from anything.
    #[serde(default = "default_conflict_window_secs")]
    pub conflict_window_secs: u64,
    /// Default chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,
    /// Maximum chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Maximum number of chunks per upload session.
    #[serde(default = "default_max_chunks_per_upload")]
    pub max_chunks_per_upload: u32,
    /// Chunk upload session timeout in seconds.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// How often expired upload sessions are swept, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_conflict_window_secs() -> u64 {
    300 // 5 minutes
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_chunks_per_upload() -> u32 {
    4096
}

fn default_upload_timeout_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            conflict_window_secs: default_conflict_window_secs(),
            default_chunk_size: default_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            max_chunks_per_upload: default_max_chunks_per_upload(),
            upload_timeout_secs: default_upload_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ServerConfig {
    /// Get the conflict window as a Duration.
    pub fn conflict_window(&self) -> Duration {
        let secs = i64::try_from(self.conflict_window_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the upload session timeout as a Duration.
    pub fn upload_timeout(&self) -> Duration {
        let secs = i64::try_from(self.upload_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Owner bootstrap configuration.
///
/// The server never stores raw tokens; the config carries the SHA-256 hex
/// of the owner's access token and the matching row is created at startup
/// if missing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Owner UUID the bootstrap token authenticates as.
    pub owner_id: uuid::Uuid,
    /// Pre-computed SHA-256 hex of the owner's token (64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Description for the bootstrap token.
    pub token_description: Option<String>,
}

impl AuthConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash corresponds to the literal token
    /// `test-owner-token`.
    pub fn for_testing() -> Self {
        Self {
            owner_id: uuid::Uuid::nil(),
            // SHA256 of "test-owner-token"
            token_hash: "18ed6880eb8fd0d8216073eb60a276861f1a271e774b0604f9c1f8027fb8521f"
                .to_string(),
            token_description: Some("Test owner token".to_string()),
        }
    }
}

/// Top-level server application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Owner bootstrap settings.
    pub auth: Option<AuthConfig>,
}

impl AppConfig {
    /// Create a configuration suitable for tests (relative temp paths,
    /// test auth token).
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            auth: Some(AuthConfig::for_testing()),
        }
    }
}

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the sync server.
    pub server_url: String,
    /// Access token presented as a bearer credential.
    pub token: String,
    /// Local directory kept in sync.
    pub sync_dir: PathBuf,
    /// Path of the client state database. Defaults to
    /// `.driftsync/state.db` inside the sync directory when unset.
    pub state_db: Option<PathBuf>,
    /// Settle delay before fingerprinting a created/modified file, in
    /// milliseconds. Lets a half-written file finish before hashing.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Seconds between scheduled sync cycles.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Files at or above this size upload in chunks.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,
    /// Chunk size for chunked uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Upload attempts per event before it is surfaced as persistently
    /// failing and skipped.
    #[serde(default = "default_max_upload_attempts")]
    pub max_upload_attempts: u32,
    /// Concurrent content uploads within one cycle.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// File name suffixes the change detector ignores.
    #[serde(default = "default_ignored_suffixes")]
    pub ignored_suffixes: Vec<String>,
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_chunk_threshold() -> u64 {
    16 * 1024 * 1024
}

fn default_max_upload_attempts() -> u32 {
    3
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_ignored_suffixes() -> Vec<String> {
    [".tmp", ".swp", ".swx", ".bak", "~", ".part", ".crdownload"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ClientConfig {
    /// Resolve the state database path.
    pub fn state_db_path(&self) -> PathBuf {
        self.state_db
            .clone()
            .unwrap_or_else(|| self.sync_dir.join(".driftsync").join("state.db"))
    }

    /// Settle delay as a std Duration.
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_delay_ms)
    }

    /// Sync interval as a std Duration.
    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.conflict_window_secs, 300);
        assert_eq!(config.conflict_window(), Duration::minutes(5));
        assert_eq!(config.default_chunk_size, 5 * 1024 * 1024);
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [storage]
            type = "filesystem"
            path = "/srv/blobs"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.conflict_window_secs, 300);
        match config.storage {
            StorageConfig::Filesystem { path } => {
                assert_eq!(path, PathBuf::from("/srv/blobs"));
            }
        }
    }

    #[test]
    fn test_client_state_db_default() {
        let config = ClientConfig {
            server_url: "http://localhost:8080".to_string(),
            token: "t".to_string(),
            sync_dir: PathBuf::from("/home/u/sync"),
            state_db: None,
            settle_delay_ms: default_settle_delay_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            chunk_threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            max_upload_attempts: default_max_upload_attempts(),
            upload_concurrency: default_upload_concurrency(),
            ignored_suffixes: default_ignored_suffixes(),
        };
        assert_eq!(
            config.state_db_path(),
            PathBuf::from("/home/u/sync/.driftsync/state.db")
        );
    }
}
