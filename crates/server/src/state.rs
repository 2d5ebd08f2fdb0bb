//! Application state shared across handlers.

use crate::notify::NotificationBus;
use driftsync_core::config::AppConfig;
use driftsync_metadata::MetadataStore;
use driftsync_storage::ContentStore;
use std::sync::Arc;

/// Shared application state.
///
/// Constructed once at startup and cloned into every handler; no
/// module-level singletons.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Content-addressed blob store.
    pub content: Arc<ContentStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Push-notification fan-out to connected clients.
    pub notifier: NotificationBus,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        content: Arc<ContentStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            content,
            metadata,
            notifier: NotificationBus::new(),
        }
    }

    /// The configured conflict window.
    pub fn conflict_window(&self) -> time::Duration {
        self.config.server.conflict_window()
    }
}
