//! Local change detection.
//!
//! Turns raw filesystem notifications into deduplicated sync events: noise
//! filtering, a settle delay so half-written files finish before hashing,
//! fingerprint-based no-op suppression, and rename decomposition into
//! delete + create.

use crate::error::ClientResult;
use crate::queue::{LocalEventQueue, PathState};
use driftsync_core::config::ClientConfig;
use driftsync_core::{ClientId, ContentHash, EventKind, OwnerId, SyncEvent, SyncPath};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches the sync directory and feeds the outbound queue.
pub struct ChangeDetector {
    config: Arc<ClientConfig>,
    owner_id: OwnerId,
    client_id: ClientId,
    queue: Arc<LocalEventQueue>,
    /// Guards against duplicate concurrent processing of one
    /// `(kind, path)` pair.
    in_flight: Mutex<HashSet<(EventKind, SyncPath)>>,
}

/// Whether a path should never produce sync events.
///
/// Dotfiles and dot-directories are skipped wholesale, as are the
/// configured temp/swap/backup suffixes.
pub fn should_ignore(path: &Path, ignored_suffixes: &[String]) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(part) = component
            && part.to_string_lossy().starts_with('.')
        {
            return true;
        }
    }

    if let Some(name) = path.file_name() {
        let name = name.to_string_lossy();
        for suffix in ignored_suffixes {
            if name.ends_with(suffix.as_str()) {
                return true;
            }
        }
    }

    false
}

impl ChangeDetector {
    /// Create a detector over the given queue.
    pub fn new(
        config: Arc<ClientConfig>,
        owner_id: OwnerId,
        client_id: ClientId,
        queue: Arc<LocalEventQueue>,
    ) -> Self {
        Self {
            config,
            owner_id,
            client_id,
            queue,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Watch the sync directory until cancelled.
    ///
    /// The notification callback runs on the watcher's own thread and only
    /// forwards into a channel; all filesystem work happens on this task,
    /// which never blocks on network I/O.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> ClientResult<()> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(1024);

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res| {
                // A full channel means we are badly behind; dropping is
                // safe because the next event for the path retries.
                let _ = tx.blocking_send(res);
            })
            .map_err(|e| crate::error::ClientError::Internal(format!("watcher init: {e}")))?;

        watcher
            .watch(&self.config.sync_dir, RecursiveMode::Recursive)
            .map_err(|e| crate::error::ClientError::Internal(format!("watch failed: {e}")))?;

        info!(dir = %self.config.sync_dir.display(), "watching for local changes");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                notification = rx.recv() => {
                    match notification {
                        Some(Ok(event)) => self.clone().dispatch(event),
                        Some(Err(e)) => warn!(error = %e, "filesystem watcher error"),
                        None => break,
                    }
                }
            }
        }

        info!("change detector stopped");
        Ok(())
    }

    /// Route one raw notification to the right handler.
    fn dispatch(self: Arc<Self>, event: notify::Event) {
        match event.kind {
            notify::EventKind::Create(CreateKind::File | CreateKind::Any) => {
                for path in event.paths {
                    self.clone().spawn_guarded(EventKind::Create, path);
                }
            }
            notify::EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
                for path in event.paths {
                    self.clone().spawn_guarded(EventKind::Modify, path);
                }
            }
            notify::EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    if let Some(path) = event.paths.first() {
                        self.clone().spawn_guarded(EventKind::Delete, path.clone());
                    }
                }
                RenameMode::To => {
                    if let Some(path) = event.paths.first() {
                        self.clone().spawn_guarded(EventKind::Create, path.clone());
                    }
                }
                RenameMode::Both | RenameMode::Any | RenameMode::Other => {
                    if event.paths.len() == 2 {
                        let from = event.paths[0].clone();
                        let to = event.paths[1].clone();
                        let detector = self.clone();
                        tokio::spawn(async move {
                            detector.process_rename(from, to).await;
                        });
                    } else if let Some(path) = event.paths.first() {
                        // Single-path rename notification; treat as modify
                        // and let fingerprinting sort it out.
                        self.clone().spawn_guarded(EventKind::Modify, path.clone());
                    }
                }
            },
            notify::EventKind::Remove(_) => {
                for path in event.paths {
                    self.clone().spawn_guarded(EventKind::Delete, path);
                }
            }
            _ => {}
        }
    }

    /// Spawn processing for one `(kind, path)` pair unless the same pair
    /// is already being processed.
    fn spawn_guarded(self: Arc<Self>, kind: EventKind, abs_path: PathBuf) {
        let Some(path) = self.relative(&abs_path) else {
            return;
        };

        let key = (kind, path.clone());
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
            if !in_flight.insert(key.clone()) {
                debug!(path = %path, kind = %kind, "already processing, skipped");
                return;
            }
        }

        let detector = self.clone();
        tokio::spawn(async move {
            match kind {
                EventKind::Delete => detector.process_delete(&path).await,
                _ => detector.process_content(kind, &path, &abs_path).await,
            }
            let mut in_flight = detector.in_flight.lock().expect("in-flight set poisoned");
            in_flight.remove(&key);
        });
    }

    /// Map an absolute path to a sync path, applying ignore rules.
    fn relative(&self, abs_path: &Path) -> Option<SyncPath> {
        let rel = abs_path.strip_prefix(&self.config.sync_dir).ok()?;
        if should_ignore(rel, &self.config.ignored_suffixes) {
            return None;
        }
        SyncPath::parse(&rel.to_string_lossy()).ok()
    }

    /// A move is modeled as Delete(old) then Create(new), in that order.
    pub(crate) async fn process_rename(&self, from: PathBuf, to: PathBuf) {
        if let Some(path) = self.relative(&from) {
            self.process_delete(&path).await;
        }
        if let Some(path) = self.relative(&to) {
            self.process_content(EventKind::Create, &path, &to).await;
        }
    }

    /// Fingerprint a created/modified file and enqueue unless nothing
    /// changed.
    pub(crate) async fn process_content(&self, kind: EventKind, path: &SyncPath, abs_path: &Path) {
        // Let a half-written file settle before hashing it.
        tokio::time::sleep(self.config.settle_delay()).await;

        let state = match fingerprint(abs_path).await {
            Ok(Some(state)) => state,
            Ok(None) => return, // directory or vanished; a later event retries
            Err(e) => {
                // Dropped, not retried: the next filesystem event for this
                // path retries naturally.
                warn!(path = %path, error = %e, "failed to fingerprint, event dropped");
                return;
            }
        };

        let previous = match self.queue.path_state(path).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to read path state, event dropped");
                return;
            }
        };
        if let Some(previous) = &previous
            && previous.content_hash == state.content_hash
            && previous.size == state.size
        {
            debug!(path = %path, "content unchanged, event suppressed");
            return;
        }

        // A create for a path we already track is really a modify.
        let kind = if previous.is_some() {
            EventKind::Modify
        } else {
            kind
        };

        if let Err(e) = self.queue.set_path_state(path, &state).await {
            warn!(path = %path, error = %e, "failed to record path state");
            return;
        }

        let event = match SyncEvent::with_content(
            self.owner_id,
            self.client_id,
            path.clone(),
            kind,
            state.content_hash,
            state.size,
            OffsetDateTime::now_utc(),
        ) {
            Ok(event) => event,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to build event");
                return;
            }
        };

        if let Err(e) = self.queue.enqueue(&event).await {
            warn!(path = %path, error = %e, "failed to enqueue event");
            return;
        }
        debug!(path = %path, kind = %event.kind, "change queued");
    }

    /// Enqueue a deletion and forget the path's fingerprint.
    pub(crate) async fn process_delete(&self, path: &SyncPath) {
        if let Err(e) = self.queue.remove_path_state(path).await {
            warn!(path = %path, error = %e, "failed to clear path state");
        }

        let event = SyncEvent::deletion(
            self.owner_id,
            self.client_id,
            path.clone(),
            OffsetDateTime::now_utc(),
        );
        if let Err(e) = self.queue.enqueue(&event).await {
            warn!(path = %path, error = %e, "failed to enqueue delete");
            return;
        }
        debug!(path = %path, "deletion queued");
    }

    /// Walk the sync directory once, seeding the fingerprint cache and
    /// queueing files that are new or changed since last run.
    pub async fn scan(&self) -> ClientResult<usize> {
        let root = self.config.sync_dir.clone();
        let suffixes = self.config.ignored_suffixes.clone();

        let files = tokio::task::spawn_blocking(move || collect_files(&root, &suffixes))
            .await
            .map_err(|e| crate::error::ClientError::Internal(e.to_string()))??;

        let mut queued = 0;
        for abs_path in files {
            let Some(path) = self.relative(&abs_path) else {
                continue;
            };
            let Ok(Some(state)) = fingerprint(&abs_path).await else {
                continue;
            };

            let previous = self.queue.path_state(&path).await?;
            if let Some(previous) = &previous
                && previous.content_hash == state.content_hash
                && previous.size == state.size
            {
                continue;
            }

            let kind = if previous.is_some() {
                EventKind::Modify
            } else {
                EventKind::Create
            };
            self.queue.set_path_state(&path, &state).await?;
            let event = SyncEvent::with_content(
                self.owner_id,
                self.client_id,
                path,
                kind,
                state.content_hash,
                state.size,
                OffsetDateTime::now_utc(),
            )?;
            self.queue.enqueue(&event).await?;
            queued += 1;
        }

        info!(queued, "initial scan complete");
        Ok(queued)
    }
}

/// Compute a file's fingerprint. `Ok(None)` means the path is not a
/// regular file (or vanished between the notification and now).
async fn fingerprint(abs_path: &Path) -> std::io::Result<Option<PathState>> {
    let metadata = match tokio::fs::metadata(abs_path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !metadata.is_file() {
        return Ok(None);
    }

    let data = tokio::fs::read(abs_path).await?;
    let mtime_unix = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    Ok(Some(PathState {
        content_hash: ContentHash::compute(&data),
        size: data.len() as u64,
        mtime_unix,
    }))
}

/// Recursively collect non-ignored regular files under `root`.
fn collect_files(root: &Path, ignored_suffixes: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap_or(&path);
            if should_ignore(rel, ignored_suffixes) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::config::ClientConfig;

    fn test_config(dir: &Path) -> Arc<ClientConfig> {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "server_url": "http://localhost:8080",
            "token": "t",
            "sync_dir": dir,
            "settle_delay_ms": 0,
        }))
        .unwrap();
        Arc::new(config)
    }

    async fn detector(dir: &Path) -> (Arc<LocalEventQueue>, ChangeDetector) {
        let queue = Arc::new(
            LocalEventQueue::open(dir.join(".driftsync/state.db"))
                .await
                .unwrap(),
        );
        let detector = ChangeDetector::new(
            test_config(dir),
            OwnerId::new(),
            ClientId::new(),
            queue.clone(),
        );
        (queue, detector)
    }

    #[test]
    fn test_ignore_rules() {
        let suffixes = vec![".tmp".to_string(), "~".to_string(), ".swp".to_string()];

        assert!(should_ignore(Path::new(".git/config"), &suffixes));
        assert!(should_ignore(Path::new("docs/.hidden"), &suffixes));
        assert!(should_ignore(Path::new("file.tmp"), &suffixes));
        assert!(should_ignore(Path::new("notes.txt~"), &suffixes));
        assert!(should_ignore(Path::new("a/.swap/x.swp"), &suffixes));

        assert!(!should_ignore(Path::new("docs/notes.txt"), &suffixes));
        assert!(!should_ignore(Path::new("tmp/file.rs"), &suffixes));
    }

    #[tokio::test]
    async fn test_identical_content_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, detector) = detector(dir.path()).await;

        let abs = dir.path().join("a.txt");
        std::fs::write(&abs, b"same content").unwrap();
        let path = SyncPath::parse("a.txt").unwrap();

        detector
            .process_content(EventKind::Create, &path, &abs)
            .await;
        assert_eq!(queue.pending().await.unwrap().len(), 1);

        // Re-touching the file with identical content produces nothing.
        detector
            .process_content(EventKind::Modify, &path, &abs)
            .await;
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event.kind, EventKind::Create);
    }

    #[tokio::test]
    async fn test_changed_content_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, detector) = detector(dir.path()).await;

        let abs = dir.path().join("a.txt");
        let path = SyncPath::parse("a.txt").unwrap();

        std::fs::write(&abs, b"v1").unwrap();
        detector
            .process_content(EventKind::Create, &path, &abs)
            .await;

        std::fs::write(&abs, b"v2").unwrap();
        detector
            .process_content(EventKind::Modify, &path, &abs)
            .await;

        // Pending collapsed per path: latest state survives.
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].event.content_hash,
            Some(ContentHash::compute(b"v2"))
        );
        assert_eq!(pending[0].event.kind, EventKind::Modify);
    }

    #[tokio::test]
    async fn test_missing_file_drops_event() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, detector) = detector(dir.path()).await;

        let path = SyncPath::parse("ghost.txt").unwrap();
        detector
            .process_content(EventKind::Create, &path, &dir.path().join("ghost.txt"))
            .await;
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_emits_delete_then_create() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, detector) = detector(dir.path()).await;

        let to = dir.path().join("new.txt");
        std::fs::write(&to, b"moved").unwrap();

        detector
            .process_rename(dir.path().join("old.txt"), to)
            .await;

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event.kind, EventKind::Delete);
        assert_eq!(pending[0].event.path.as_str(), "old.txt");
        assert_eq!(pending[1].event.kind, EventKind::Create);
        assert_eq!(pending[1].event.path.as_str(), "new.txt");
    }

    #[tokio::test]
    async fn test_scan_seeds_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("skip.tmp"), b"x").unwrap();

        let (queue, detector) = detector(dir.path()).await;

        let queued = detector.scan().await.unwrap();
        assert_eq!(queued, 2);
        assert_eq!(queue.pending().await.unwrap().len(), 2);

        // Second scan finds nothing new.
        assert_eq!(detector.scan().await.unwrap(), 0);
    }
}
