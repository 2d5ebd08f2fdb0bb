//! Sync cycle orchestration.
//!
//! One logical cycle pushes queued local events, pulls and applies remote
//! changes, then heartbeats. At most one cycle runs at a time: a trigger
//! that arrives mid-cycle is dropped, not queued, because the next
//! scheduled cycle picks up whatever work remains.

use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};
use crate::queue::{LocalEventQueue, PathState, QueuedEvent};
use driftsync_core::config::ClientConfig;
use driftsync_core::{ClientId, ContentHash, FileRecordView};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives sync cycles against the server.
pub struct SyncCoordinator {
    config: Arc<ClientConfig>,
    client_id: ClientId,
    queue: Arc<LocalEventQueue>,
    api: Arc<ApiClient>,
    cycle_lock: tokio::sync::Mutex<()>,
    cycles_started: AtomicU64,
    degraded: AtomicBool,
}

impl SyncCoordinator {
    /// Create a coordinator.
    pub fn new(
        config: Arc<ClientConfig>,
        client_id: ClientId,
        queue: Arc<LocalEventQueue>,
        api: Arc<ApiClient>,
    ) -> Self {
        Self {
            config,
            client_id,
            queue,
            api,
            cycle_lock: tokio::sync::Mutex::new(()),
            cycles_started: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// Scheduler loop: a cycle per interval tick plus manual triggers from
    /// the push listener, until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<()>,
        token: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.config.sync_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.try_sync(&token).await,
                Some(()) = triggers.recv() => self.try_sync(&token).await,
            }
        }

        info!("sync coordinator stopped");
    }

    /// Run one cycle unless one is already in progress.
    pub async fn try_sync(&self, token: &CancellationToken) {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("sync already in progress, trigger ignored");
            return;
        };
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
        debug!("sync cycle starting");

        match self.upload_phase(token).await {
            Ok(()) => {}
            Err(ClientError::Auth(message)) => {
                // Fail fast: retrying with the same token cannot succeed.
                error!(detail = %message, "authentication failed, aborting cycle");
                return;
            }
            Err(e) => warn!(error = %e, "upload phase incomplete, events stay pending"),
        }

        if token.is_cancelled() {
            return;
        }

        if let Err(e) = self.download_phase(token).await {
            warn!(error = %e, "download phase incomplete, high-water mark unchanged");
        }

        // Liveness probe; failures are logged, never fatal.
        if let Err(e) = self.api.heartbeat(&self.client_id).await {
            warn!(error = %e, "heartbeat failed");
        }

        debug!("sync cycle finished");
    }

    /// Push queued events: upload content, send the event, acknowledge.
    async fn upload_phase(&self, token: &CancellationToken) -> ClientResult<()> {
        let pending = self.queue.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }

        let (ready, exhausted): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|queued| queued.attempts < self.config.max_upload_attempts);

        if !exhausted.is_empty() {
            self.degraded.store(true, Ordering::Relaxed);
            for queued in &exhausted {
                warn!(
                    path = %queued.event.path,
                    attempts = queued.attempts,
                    "event exceeded retry budget, sync degraded until resolved"
                );
            }
        }

        // Bounded concurrent uploads; acknowledgments are independent and
        // commutative, so completion order does not matter.
        let results: Vec<ClientResult<()>> = futures::stream::iter(ready)
            .map(|queued| self.process_upload(queued, token))
            .buffer_unordered(self.config.upload_concurrency.max(1))
            .collect()
            .await;

        // Surface an authentication failure to abort the cycle; other
        // per-event failures were already recorded.
        for result in results {
            if let Err(e @ ClientError::Auth(_)) = result {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn process_upload(&self, queued: QueuedEvent, token: &CancellationToken) -> ClientResult<()> {
        if token.is_cancelled() {
            // Leave the event pending; no partial acknowledgment.
            return Ok(());
        }

        let event = &queued.event;
        let result = self.push_one(event).await;
        match result {
            Ok(()) => {
                self.queue.acknowledge(&event.id).await?;
                debug!(path = %event.path, kind = %event.kind, "event acknowledged");
                Ok(())
            }
            Err(e @ ClientError::Auth(_)) => Err(e),
            Err(e) => {
                let attempts = self.queue.record_failure(&event.id).await?;
                warn!(
                    path = %event.path,
                    attempts,
                    error = %e,
                    "event upload failed, left pending"
                );
                Ok(())
            }
        }
    }

    async fn push_one(&self, event: &driftsync_core::SyncEvent) -> ClientResult<()> {
        if event.kind.carries_content() {
            let local = event.path.to_local(&self.config.sync_dir);
            let data = tokio::fs::read(&local).await.map(bytes::Bytes::from)?;

            let local_hash = ContentHash::compute(&data);
            if Some(local_hash) != event.content_hash {
                // The file changed again after this event was queued; the
                // detector has (or will have) queued a superseding event.
                return Err(ClientError::Internal(format!(
                    "content of {} changed since event was queued",
                    event.path
                )));
            }

            self.api.upload_content(data).await?;
        }

        let response = self.api.push_event(event).await?;
        debug!(path = %event.path, outcome = ?response.outcome, "event resolved by server");
        Ok(())
    }

    /// Pull and apply remote changes since the high-water mark.
    ///
    /// The mark advances only after the whole batch applied, so a crash
    /// mid-batch re-requests the same batch; application is idempotent by
    /// construction.
    async fn download_phase(&self, token: &CancellationToken) -> ClientResult<()> {
        let since = self.queue.high_water_mark().await?;
        let changes = self.api.get_changes(since).await?;

        if !changes.records.is_empty() {
            info!(count = changes.records.len(), "applying remote changes");
        }

        for record in &changes.records {
            if token.is_cancelled() {
                // Abort between file operations; the unchanged mark makes
                // the next cycle re-request this batch.
                return Ok(());
            }
            self.apply_record(record).await?;
        }

        self.queue.set_high_water_mark(changes.server_timestamp).await?;
        Ok(())
    }

    /// Bring one local path in line with a server record.
    pub(crate) async fn apply_record(&self, record: &FileRecordView) -> ClientResult<()> {
        let local = record.path.to_local(&self.config.sync_dir);

        if record.is_deleted {
            self.queue.remove_path_state(&record.path).await?;
            match tokio::fs::remove_file(&local).await {
                Ok(()) => debug!(path = %record.path, "remote deletion applied"),
                // Already absent locally is success, not an error.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        // Download only on checksum mismatch.
        if let Ok(data) = tokio::fs::read(&local).await {
            if ContentHash::compute(&data) == record.content_hash {
                // Make sure the fingerprint cache agrees so the change
                // detector suppresses the echo.
                self.queue
                    .set_path_state(
                        &record.path,
                        &PathState {
                            content_hash: record.content_hash,
                            size: record.size,
                            mtime_unix: OffsetDateTime::now_utc().unix_timestamp(),
                        },
                    )
                    .await?;
                return Ok(());
            }
        }

        let data = self.api.download_content(&record.content_hash).await?;

        // Record the fingerprint before the bytes land so the resulting
        // filesystem notification is suppressed as a no-op.
        self.queue
            .set_path_state(
                &record.path,
                &PathState {
                    content_hash: record.content_hash,
                    size: record.size,
                    mtime_unix: OffsetDateTime::now_utc().unix_timestamp(),
                },
            )
            .await?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = local.with_extension(format!("driftsync-{}", Uuid::new_v4()));
        tokio::fs::write(&temp, &data).await?;
        tokio::fs::rename(&temp, &local).await?;

        debug!(path = %record.path, version = record.version_number, "remote change applied");
        Ok(())
    }

    /// Number of cycles that actually started (triggers dropped by the
    /// single-flight guard do not count).
    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    /// Whether any event has exhausted its retry budget.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::SyncPath;
    use std::path::Path;

    fn test_config(dir: &Path) -> Arc<ClientConfig> {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "server_url": "http://localhost:8080",
            "token": "t",
            "sync_dir": dir,
        }))
        .unwrap();
        Arc::new(config)
    }

    async fn coordinator(dir: &Path) -> (Arc<LocalEventQueue>, SyncCoordinator) {
        let config = test_config(dir);
        let queue = Arc::new(
            LocalEventQueue::open(dir.join(".driftsync/state.db"))
                .await
                .unwrap(),
        );
        let api = Arc::new(
            ApiClient::new(
                &config.server_url,
                &config.token,
                config.chunk_threshold,
                config.chunk_size,
            )
            .unwrap(),
        );
        let coordinator = SyncCoordinator::new(config, ClientId::new(), queue.clone(), api);
        (queue, coordinator)
    }

    #[tokio::test]
    async fn test_second_trigger_is_dropped_while_cycle_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (_queue, coordinator) = coordinator(dir.path()).await;
        let token = CancellationToken::new();

        // Simulate a running cycle by holding the single-flight guard.
        let guard = coordinator.cycle_lock.try_lock().unwrap();
        coordinator.try_sync(&token).await;
        assert_eq!(coordinator.cycles_started(), 0);
        drop(guard);
    }

    #[tokio::test]
    async fn test_apply_deleted_record_with_absent_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (_queue, coordinator) = coordinator(dir.path()).await;

        let record = FileRecordView {
            path: SyncPath::parse("never/existed.txt").unwrap(),
            content_hash: ContentHash::compute(b"x"),
            size: 1,
            version_number: 2,
            modified_at: OffsetDateTime::now_utc(),
            is_deleted: true,
        };

        coordinator.apply_record(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_deleted_record_removes_file_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, coordinator) = coordinator(dir.path()).await;

        let abs = dir.path().join("doomed.txt");
        std::fs::write(&abs, b"bye").unwrap();
        let path = SyncPath::parse("doomed.txt").unwrap();
        queue
            .set_path_state(
                &path,
                &PathState {
                    content_hash: ContentHash::compute(b"bye"),
                    size: 3,
                    mtime_unix: 0,
                },
            )
            .await
            .unwrap();

        let record = FileRecordView {
            path: path.clone(),
            content_hash: ContentHash::compute(b"bye"),
            size: 3,
            version_number: 2,
            modified_at: OffsetDateTime::now_utc(),
            is_deleted: true,
        };
        coordinator.apply_record(&record).await.unwrap();

        assert!(!abs.exists());
        assert!(queue.path_state(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_skips_download_when_content_matches() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, coordinator) = coordinator(dir.path()).await;

        let abs = dir.path().join("same.txt");
        std::fs::write(&abs, b"identical").unwrap();
        let path = SyncPath::parse("same.txt").unwrap();

        let record = FileRecordView {
            path: path.clone(),
            content_hash: ContentHash::compute(b"identical"),
            size: 9,
            version_number: 1,
            modified_at: OffsetDateTime::now_utc(),
            is_deleted: false,
        };

        // No server is reachable, so this passing proves no download was
        // attempted.
        coordinator.apply_record(&record).await.unwrap();
        assert_eq!(
            queue.path_state(&path).await.unwrap().unwrap().content_hash,
            ContentHash::compute(b"identical")
        );
    }
}
