//! Integration tests for the refresh lifecycle: reconcile, update, archive, reap.
//!
//! Each test creates its own in-memory SQLite database for isolation. A
//! `QueuedSpawner` holds the background sweeps so each test decides when they
//! run, and a `FixedClock` pins every timestamp.

use std::sync::Arc;

use feedsync::clock::FixedClock;
use feedsync::storage::{CandidateEntry, Database, EntryStatus, NewFeed};
use feedsync::tasks::{QueuedSpawner, TaskOutcome};
use feedsync::util::content_hash;
use pretty_assertions::assert_eq;

const T0: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

struct Harness {
    db: Database,
    clock: Arc<FixedClock>,
    spawner: Arc<QueuedSpawner>,
    user_id: i64,
    feed_id: i64,
}

async fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(T0));
    let spawner = Arc::new(QueuedSpawner::new());
    let db = Database::open(":memory:")
        .await
        .unwrap()
        .with_clock(clock.clone())
        .with_spawner(spawner.clone());

    let user = db.create_user("reader").await.unwrap();
    let category = db.create_category(user.id, "News", false).await.unwrap();
    let feed = db
        .create_feed(
            user.id,
            &NewFeed {
                category_id: category.id,
                title: "Example".to_string(),
                feed_url: "https://example.com/feed.xml".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    Harness {
        db,
        clock,
        spawner,
        user_id: user.id,
        feed_id: feed.id,
    }
}

fn candidate(hash: &str, title: &str) -> CandidateEntry {
    CandidateEntry {
        hash: hash.to_string(),
        title: title.to_string(),
        url: format!("https://example.com/{}", hash),
        content: format!("<p>{}</p>", title),
        published_at: T0,
        ..Default::default()
    }
}

async fn entry_by_hash(h: &Harness, hash: &str) -> Option<feedsync::storage::Entry> {
    h.db
        .new_entry_query_builder(h.user_id)
        .with_feed_id(h.feed_id)
        .get_entries()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.hash == hash)
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_refresh_update_and_reap_scenario() {
    let h = harness().await;

    let created = h
        .db
        .refresh_feed_entries(
            h.user_id,
            h.feed_id,
            &[candidate("h1", "A"), candidate("h2", "B")],
            true,
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|e| e.status == EntryStatus::Unread));
    h.spawner.run_pending().await;

    let h2 = entry_by_hash(&h, "h2").await.unwrap();
    h.db
        .set_entries_status(h.user_id, &[h2.id], EntryStatus::Removed)
        .await
        .unwrap();

    h.clock.advance(60);
    let created = h
        .db
        .refresh_feed_entries(
            h.user_id,
            h.feed_id,
            &[candidate("h1", "A2"), candidate("h3", "C")],
            true,
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].hash, "h3");

    let h1 = entry_by_hash(&h, "h1").await.unwrap();
    assert_eq!(h1.title, "A2");
    assert_eq!(h1.status, EntryStatus::Unread);
    assert_eq!(h1.changed_at, T0 + 60);

    // Reconciliation left h2 alone; the sweep has not run yet
    let untouched = entry_by_hash(&h, "h2").await.unwrap();
    assert_eq!(untouched.title, "B");
    assert_eq!(untouched.status, EntryStatus::Removed);

    let reports = h.spawner.run_pending().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, TaskOutcome::Completed);

    assert!(entry_by_hash(&h, "h2").await.is_none());
    assert!(h.db.is_new_entry(h.feed_id, "h2").await.unwrap());
    assert_eq!(h.db.count_all_entries().await.unwrap().total, 2);
}

#[tokio::test]
async fn test_reaper_deletes_only_absent_removed_entries() {
    let h = harness().await;
    let batch = [
        candidate("A", "a"),
        candidate("B", "b"),
        candidate("C", "c"),
        candidate("D", "d"),
    ];
    let created = h.db.refresh_feed_entries(h.user_id, h.feed_id, &batch, false).await.unwrap();
    let removed: Vec<i64> = created.iter().take(3).map(|e| e.id).collect();
    h.db
        .set_entries_status(h.user_id, &removed, EntryStatus::Removed)
        .await
        .unwrap();

    let deleted = h
        .db
        .cleanup_entries(h.feed_id, &["A".to_string(), "C".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    for hash in ["A", "C", "D"] {
        assert!(entry_by_hash(&h, hash).await.is_some(), "{hash} should remain");
    }
    assert!(entry_by_hash(&h, "B").await.is_none());
}

#[tokio::test]
async fn test_empty_fetch_never_wipes_removed_entries() {
    let h = harness().await;
    let created = h
        .db
        .refresh_feed_entries(h.user_id, h.feed_id, &[candidate("A", "a")], false)
        .await
        .unwrap();
    h.db
        .set_entries_status(h.user_id, &[created[0].id], EntryStatus::Removed)
        .await
        .unwrap();
    h.spawner.run_pending().await;

    h.db.refresh_feed_entries(h.user_id, h.feed_id, &[], false).await.unwrap();
    h.spawner.run_pending().await;

    assert!(entry_by_hash(&h, "A").await.is_some());
}

// ============================================================================
// Dedup
// ============================================================================

#[tokio::test]
async fn test_content_hash_dedup_across_refreshes() {
    let h = harness().await;
    let hash = content_hash("https://example.com/posts/1");
    let item = candidate(&hash, "Post");

    h.db.refresh_feed_entries(h.user_id, h.feed_id, &[item.clone()], false).await.unwrap();
    h.db.refresh_feed_entries(h.user_id, h.feed_id, &[item], false).await.unwrap();

    assert_eq!(
        h.db.new_entry_query_builder(h.user_id).count_entries().await.unwrap(),
        1
    );
    assert!(!h.db.is_new_entry(h.feed_id, &hash).await.unwrap());
}

#[tokio::test]
async fn test_partial_batch_is_committed_up_to_failure() {
    let h = harness().await;
    h.db
        .refresh_feed_entries(h.user_id, h.feed_id, &[candidate("owned", "x")], false)
        .await
        .unwrap();
    h.spawner.run_pending().await;

    // Existence is checked per feed, updates per user: a second user
    // refreshing this feed fails on the entry it does not own.
    let other = h.db.create_user("other").await.unwrap();
    let batch = [
        candidate("before", "1"),
        candidate("owned", "2"),
        candidate("after", "3"),
    ];
    let err = h
        .db
        .refresh_feed_entries(other.id, h.feed_id, &batch, true)
        .await
        .unwrap_err();
    assert!(err.is_nothing_updated());
    assert_eq!(err.to_string(), "nothing has been updated");

    assert!(!h.db.is_new_entry(h.feed_id, "before").await.unwrap());
    assert!(h.db.is_new_entry(h.feed_id, "after").await.unwrap());
    assert_eq!(entry_by_hash(&h, "owned").await.unwrap().title, "x");
    assert_eq!(h.spawner.pending(), 0);
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_archive_then_reap_old_read_entries() {
    let h = harness().await;
    let created = h
        .db
        .refresh_feed_entries(
            h.user_id,
            h.feed_id,
            &[candidate("old", "o"), candidate("starred", "s")],
            false,
        )
        .await
        .unwrap();
    let ids: Vec<i64> = created.iter().map(|e| e.id).collect();
    h.db.set_entries_status(h.user_id, &ids, EntryStatus::Read).await.unwrap();
    h.db.toggle_bookmark(h.user_id, created[1].id).await.unwrap();
    h.spawner.run_pending().await;

    h.clock.advance(61 * DAY);
    assert_eq!(h.db.archive_entries(EntryStatus::Read, 60, 10_000).await.unwrap(), 1);

    // The feed no longer lists the archived item
    h.db
        .refresh_feed_entries(h.user_id, h.feed_id, &[candidate("starred", "s")], false)
        .await
        .unwrap();
    h.spawner.run_pending().await;

    assert!(entry_by_hash(&h, "old").await.is_none());
    let starred = entry_by_hash(&h, "starred").await.unwrap();
    assert!(starred.starred);
    assert_eq!(starred.status, EntryStatus::Read);
}

#[tokio::test]
async fn test_shared_entries_survive_archive_and_flush() {
    let h = harness().await;
    let created = h
        .db
        .refresh_feed_entries(h.user_id, h.feed_id, &[candidate("s", "shared")], false)
        .await
        .unwrap();
    let id = created[0].id;
    let code = h.db.entry_share_code(h.user_id, id).await.unwrap().unwrap();
    h.db.set_entries_status(h.user_id, &[id], EntryStatus::Read).await.unwrap();

    h.clock.advance(365 * DAY);
    assert_eq!(h.db.archive_entries(EntryStatus::Read, 1, 100).await.unwrap(), 0);
    assert_eq!(h.db.flush_history(h.user_id).await.unwrap(), 0);

    let shared = h
        .db
        .new_entry_query_builder(h.user_id)
        .with_share_code(&code)
        .get_entry()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shared.status, EntryStatus::Read);
}

#[tokio::test]
async fn test_removing_user_sweeps_everything() {
    let h = harness().await;
    h.db
        .refresh_feed_entries(h.user_id, h.feed_id, &[candidate("a", "a")], false)
        .await
        .unwrap();
    h.spawner.run_pending().await;

    h.db.remove_user_async(h.user_id);
    let reports = h.spawner.run_pending().await;
    assert_eq!(reports[0].outcome, TaskOutcome::Completed);

    assert!(h.db.user_by_id(h.user_id).await.unwrap().is_none());
    assert_eq!(h.db.count_all_entries().await.unwrap().total, 0);
}
