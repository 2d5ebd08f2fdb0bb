//! Conflict resolution integration tests.

use driftsync_core::{
    ClientId, ConflictResolution, ContentHash, EventKind, OwnerId, SyncEvent, SyncOutcome,
    SyncPath,
};
use driftsync_metadata::{FileRecordRepo, MetadataStore, SqliteStore};
use driftsync_server::ConflictResolver;
use std::sync::Arc;
use time::OffsetDateTime;

const WINDOW: time::Duration = time::Duration::minutes(5);

async fn resolver() -> (tempfile::TempDir, Arc<dyn MetadataStore>, ConflictResolver) {
    let temp = tempfile::tempdir().unwrap();
    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteStore::new(temp.path().join("metadata.db"))
            .await
            .unwrap(),
    );
    let resolver = ConflictResolver::new(metadata.clone(), WINDOW);
    (temp, metadata, resolver)
}

fn content_event(
    owner: OwnerId,
    path: &str,
    kind: EventKind,
    content: &[u8],
    timestamp: OffsetDateTime,
) -> SyncEvent {
    SyncEvent::with_content(
        owner,
        ClientId::new(),
        SyncPath::parse(path).unwrap(),
        kind,
        ContentHash::compute(content),
        content.len() as u64,
        timestamp,
    )
    .unwrap()
}

#[tokio::test]
async fn test_create_starts_at_version_one() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();

    let event = content_event(
        owner,
        "notes.txt",
        EventKind::Create,
        b"v1",
        OffsetDateTime::now_utc(),
    );
    let response = resolver.apply(&event).await.unwrap();

    assert_eq!(response.outcome, SyncOutcome::Created);
    let record = response.record.unwrap();
    assert_eq!(record.version_number, 1);
    assert!(!record.is_deleted);
    assert_eq!(record.content_hash, ContentHash::compute(b"v1"));
}

#[tokio::test]
async fn test_versions_increase_monotonically() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(10);

    let create = content_event(owner, "a.txt", EventKind::Create, b"v1", t0);
    resolver.apply(&create).await.unwrap();

    let mut last_version = 1;
    for i in 1..5u64 {
        // Spread edits an hour apart so no conflict window applies.
        let event = content_event(
            owner,
            "a.txt",
            EventKind::Modify,
            format!("v{}", i + 1).as_bytes(),
            t0 + time::Duration::hours(i as i64),
        );
        let response = resolver.apply(&event).await.unwrap();
        assert_eq!(response.outcome, SyncOutcome::Updated);
        let version = response.record.unwrap().version_number;
        assert!(version > last_version);
        last_version = version;
    }
    assert_eq!(last_version, 5);
}

#[tokio::test]
async fn test_delete_tombstones_and_bumps_version() {
    let (_t, metadata, resolver) = resolver().await;
    let owner = OwnerId::new();

    let create = content_event(
        owner,
        "draft.txt",
        EventKind::Create,
        b"text",
        OffsetDateTime::now_utc(),
    );
    resolver.apply(&create).await.unwrap();

    let delete = SyncEvent::deletion(
        owner,
        ClientId::new(),
        SyncPath::parse("draft.txt").unwrap(),
        OffsetDateTime::now_utc(),
    );
    let response = resolver.apply(&delete).await.unwrap();

    assert_eq!(response.outcome, SyncOutcome::Deleted);
    let record = response.record.unwrap();
    assert!(record.is_deleted);
    assert_eq!(record.version_number, 2);

    // The tombstone row persists rather than being removed.
    let row = metadata
        .get_record(*owner.as_uuid(), "draft.txt")
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_deleted);
}

#[tokio::test]
async fn test_delete_of_unknown_path_is_not_found() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();

    let delete = SyncEvent::deletion(
        owner,
        ClientId::new(),
        SyncPath::parse("ghost.txt").unwrap(),
        OffsetDateTime::now_utc(),
    );
    let response = resolver.apply(&delete).await.unwrap();
    assert_eq!(response.outcome, SyncOutcome::NotFound);

    // Deleting a tombstone is also a no-op.
    let create = content_event(
        owner,
        "gone.txt",
        EventKind::Create,
        b"x",
        OffsetDateTime::now_utc(),
    );
    resolver.apply(&create).await.unwrap();
    let delete = SyncEvent::deletion(
        owner,
        ClientId::new(),
        SyncPath::parse("gone.txt").unwrap(),
        OffsetDateTime::now_utc(),
    );
    resolver.apply(&delete).await.unwrap();

    let again = SyncEvent::deletion(
        owner,
        ClientId::new(),
        SyncPath::parse("gone.txt").unwrap(),
        OffsetDateTime::now_utc(),
    );
    let response = resolver.apply(&again).await.unwrap();
    assert_eq!(response.outcome, SyncOutcome::NotFound);
}

#[tokio::test]
async fn test_recreation_over_tombstone_keeps_version_climbing() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(2);

    resolver
        .apply(&content_event(owner, "a.txt", EventKind::Create, b"v1", t0))
        .await
        .unwrap();
    resolver
        .apply(&SyncEvent::deletion(
            owner,
            ClientId::new(),
            SyncPath::parse("a.txt").unwrap(),
            t0 + time::Duration::hours(1),
        ))
        .await
        .unwrap();

    let recreate = content_event(
        owner,
        "a.txt",
        EventKind::Create,
        b"v2",
        t0 + time::Duration::hours(2),
    );
    let response = resolver.apply(&recreate).await.unwrap();

    assert_eq!(response.outcome, SyncOutcome::Created);
    let record = response.record.unwrap();
    assert!(!record.is_deleted);
    assert_eq!(record.version_number, 3);
}

#[tokio::test]
async fn test_conflict_later_timestamp_wins_regardless_of_arrival_order() {
    // Two differing edits 60 seconds apart, inside the 5 minute window.
    // Whichever arrives first, the T0+60s content must end up stored.
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(1);
    let t1 = t0 + time::Duration::seconds(60);

    for arrival_order in [[b"v1", b"v2"], [b"v2", b"v1"]] {
        let (_t, _m, resolver) = resolver().await;
        let owner = OwnerId::new();

        let timestamps = if arrival_order[0] == b"v1" {
            [t0, t1]
        } else {
            [t1, t0]
        };

        let first = content_event(
            owner,
            "notes.txt",
            EventKind::Create,
            arrival_order[0],
            timestamps[0],
        );
        resolver.apply(&first).await.unwrap();

        let second = content_event(
            owner,
            "notes.txt",
            EventKind::Modify,
            arrival_order[1],
            timestamps[1],
        );
        let response = resolver.apply(&second).await.unwrap();

        let record = response.record.unwrap();
        assert_eq!(
            record.content_hash,
            ContentHash::compute(b"v2"),
            "later-timestamped content must win (arrival order {:?})",
            arrival_order.map(|b| String::from_utf8_lossy(b).into_owned()),
        );
        assert_eq!(record.modified_at, t1);
    }
}

#[tokio::test]
async fn test_conflict_existing_wins_reports_current_record() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(1);

    let newer = content_event(owner, "a.txt", EventKind::Create, b"newer", t0);
    resolver.apply(&newer).await.unwrap();

    // A stale offline edit from 2 minutes earlier arrives second.
    let stale = content_event(
        owner,
        "a.txt",
        EventKind::Modify,
        b"stale",
        t0 - time::Duration::minutes(2),
    );
    let response = resolver.apply(&stale).await.unwrap();

    assert_eq!(
        response.outcome,
        SyncOutcome::Conflict {
            resolution: ConflictResolution::ExistingVersionWins
        }
    );
    // The losing client gets the record it lost to, for local reconcile.
    let record = response.record.unwrap();
    assert_eq!(record.content_hash, ContentHash::compute(b"newer"));
    assert_eq!(record.version_number, 1);
    assert_eq!(record.modified_at, t0);
}

#[tokio::test]
async fn test_conflict_new_version_wins_outcome() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(1);

    resolver
        .apply(&content_event(owner, "a.txt", EventKind::Create, b"old", t0))
        .await
        .unwrap();

    let newer = content_event(
        owner,
        "a.txt",
        EventKind::Modify,
        b"new",
        t0 + time::Duration::seconds(90),
    );
    let response = resolver.apply(&newer).await.unwrap();

    assert_eq!(
        response.outcome,
        SyncOutcome::Conflict {
            resolution: ConflictResolution::NewVersionWins
        }
    );
    assert_eq!(response.record.unwrap().version_number, 2);
}

#[tokio::test]
async fn test_outside_window_is_plain_update() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(2);

    resolver
        .apply(&content_event(owner, "a.txt", EventKind::Create, b"old", t0))
        .await
        .unwrap();

    // Ten minutes later is outside the 5-minute window: no conflict.
    let later = content_event(
        owner,
        "a.txt",
        EventKind::Modify,
        b"new",
        t0 + time::Duration::minutes(10),
    );
    let response = resolver.apply(&later).await.unwrap();
    assert_eq!(response.outcome, SyncOutcome::Updated);
}

#[tokio::test]
async fn test_replayed_event_id_does_not_double_apply() {
    let (_t, _m, resolver) = resolver().await;
    let owner = OwnerId::new();
    let t0 = OffsetDateTime::now_utc() - time::Duration::hours(1);

    resolver
        .apply(&content_event(owner, "a.txt", EventKind::Create, b"v1", t0))
        .await
        .unwrap();

    let modify = content_event(
        owner,
        "a.txt",
        EventKind::Modify,
        b"v2",
        t0 + time::Duration::hours(1),
    );
    let first = resolver.apply(&modify).await.unwrap();
    assert_eq!(first.outcome, SyncOutcome::Updated);
    assert_eq!(first.record.as_ref().unwrap().version_number, 2);

    // The queue is at-least-once; the same event arrives again.
    let replay = resolver.apply(&modify).await.unwrap();
    assert_eq!(replay.outcome, SyncOutcome::Updated);
    assert_eq!(replay.record.unwrap().version_number, 2);
}
