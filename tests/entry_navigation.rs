//! Integration tests for reading-list views: filtering, counting and
//! previous/next navigation across feeds and categories.

use std::sync::Arc;

use feedsync::clock::FixedClock;
use feedsync::storage::{
    CandidateEntry, Database, Entry, EntryStatus, NewFeed, PaginationOrder, SortDirection,
    SortField,
};
use feedsync::tasks::QueuedSpawner;
use pretty_assertions::assert_eq;

const T0: i64 = 1_700_000_000;

async fn test_db() -> Database {
    Database::open(":memory:")
        .await
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(T0)))
        .with_spawner(Arc::new(QueuedSpawner::new()))
}

async fn subscribe(db: &Database, user_id: i64, category: &str, url: &str) -> i64 {
    let category_id = match db
        .categories(user_id)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.title == category)
    {
        Some(c) => c.id,
        None => db.create_category(user_id, category, false).await.unwrap().id,
    };
    db.create_feed(
        user_id,
        &NewFeed {
            category_id,
            title: url.to_string(),
            feed_url: url.to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .id
}

fn item(hash: &str, published_at: i64, tags: &[&str]) -> CandidateEntry {
    CandidateEntry {
        hash: hash.to_string(),
        title: format!("Entry {}", hash),
        url: format!("https://example.com/{}", hash),
        content: format!("Body of {}", hash),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        published_at,
        ..Default::default()
    }
}

fn ids(entries: &[Entry]) -> Vec<i64> {
    entries.iter().map(|e| e.id).collect()
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_pagination_walks_three_entries() {
    let db = test_db().await;
    let user = db.create_user("reader").await.unwrap();
    let feed = subscribe(&db, user.id, "Tech", "https://a.example/feed").await;
    let created = db
        .refresh_feed_entries(
            user.id,
            feed,
            &[item("e1", T0 + 1, &[]), item("e2", T0 + 2, &[]), item("e3", T0 + 3, &[])],
            false,
        )
        .await
        .unwrap();
    let (e1, e2, e3) = (created[0].id, created[1].id, created[2].id);

    let nav = |anchor| {
        db.new_entry_pagination_builder(user.id, anchor, PaginationOrder::PublishedAt, SortDirection::Asc)
    };

    let (prev, next) = nav(e2).entries().await.unwrap();
    assert_eq!((prev.map(|s| s.id), next.map(|s| s.id)), (Some(e1), Some(e3)));

    let (prev, next) = nav(e1).entries().await.unwrap();
    assert_eq!((prev.map(|s| s.id), next.map(|s| s.id)), (None, Some(e2)));

    let (prev, next) = nav(e3).entries().await.unwrap();
    assert_eq!((prev.map(|s| s.id), next.map(|s| s.id)), (Some(e2), None));
}

#[tokio::test]
async fn test_pagination_within_feed_and_by_created_at() {
    let db = test_db().await;
    let user = db.create_user("reader").await.unwrap();
    let feed_a = subscribe(&db, user.id, "Tech", "https://a.example/feed").await;
    let feed_b = subscribe(&db, user.id, "Tech", "https://b.example/feed").await;

    let a = db
        .refresh_feed_entries(user.id, feed_a, &[item("a1", T0 + 1, &[]), item("a2", T0 + 3, &[])], false)
        .await
        .unwrap();
    db.refresh_feed_entries(user.id, feed_b, &[item("b1", T0 + 2, &[])], false)
        .await
        .unwrap();

    let (prev, next) = db
        .new_entry_pagination_builder(user.id, a[0].id, PaginationOrder::PublishedAt, SortDirection::Asc)
        .with_feed_id(feed_a)
        .entries()
        .await
        .unwrap();
    assert!(prev.is_none());
    assert_eq!(next.map(|s| s.title), Some("Entry a2".to_string()));

    // created_at is identical for the batch, so ids break the tie
    let (prev, next) = db
        .new_entry_pagination_builder(user.id, a[1].id, PaginationOrder::CreatedAt, SortDirection::Desc)
        .with_feed_id(feed_a)
        .entries()
        .await
        .unwrap();
    assert_eq!(prev.map(|s| s.id), Some(a[0].id));
    assert!(next.is_none());
}

#[tokio::test]
async fn test_pagination_ignores_other_users() {
    let db = test_db().await;
    let alice = db.create_user("alice").await.unwrap();
    let bob = db.create_user("bob").await.unwrap();
    let feed = subscribe(&db, alice.id, "Tech", "https://a.example/feed").await;
    let created = db
        .refresh_feed_entries(alice.id, feed, &[item("x", T0, &[])], false)
        .await
        .unwrap();

    let (prev, next) = db
        .new_entry_pagination_builder(bob.id, created[0].id, PaginationOrder::PublishedAt, SortDirection::Asc)
        .entries()
        .await
        .unwrap();
    assert!(prev.is_none() && next.is_none());
}

// ============================================================================
// Query Builder
// ============================================================================

#[tokio::test]
async fn test_category_and_tag_filters_combine() {
    let db = test_db().await;
    let user = db.create_user("reader").await.unwrap();
    let tech = subscribe(&db, user.id, "Tech", "https://tech.example/feed").await;
    let news = subscribe(&db, user.id, "News", "https://news.example/feed").await;

    let tech_entries = db
        .refresh_feed_entries(
            user.id,
            tech,
            &[item("t1", T0, &["Rust"]), item("t2", T0 + 1, &["Go"])],
            false,
        )
        .await
        .unwrap();
    db.refresh_feed_entries(user.id, news, &[item("n1", T0, &["rust"])], false)
        .await
        .unwrap();

    let tech_category = db.feed_by_id(user.id, tech).await.unwrap().unwrap().category_id;
    let found = db
        .new_entry_query_builder(user.id)
        .with_category_id(tech_category)
        .with_tags(&["RUST"])
        .get_entries()
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![tech_entries[0].id]);

    let all_rust = db
        .new_entry_query_builder(user.id)
        .with_tags(&["rust"])
        .count_entries()
        .await
        .unwrap();
    assert_eq!(all_rust, 2);
}

#[tokio::test]
async fn test_paging_through_sorted_results() {
    let db = test_db().await;
    let user = db.create_user("reader").await.unwrap();
    let feed = subscribe(&db, user.id, "Tech", "https://a.example/feed").await;
    let batch: Vec<_> = (0..5).map(|i| item(&format!("p{}", i), T0 + i, &[])).collect();
    let created = db.refresh_feed_entries(user.id, feed, &batch, false).await.unwrap();

    let page = |offset| {
        db.new_entry_query_builder(user.id)
            .with_sorting(SortField::PublishedAt, SortDirection::Desc)
            .with_limit(2)
            .with_offset(offset)
    };

    let first = page(0).get_entry_ids().await.unwrap();
    let second = page(2).get_entry_ids().await.unwrap();
    let third = page(4).get_entry_ids().await.unwrap();
    assert_eq!(first, vec![created[4].id, created[3].id]);
    assert_eq!(second, vec![created[2].id, created[1].id]);
    assert_eq!(third, vec![created[0].id]);
    assert_eq!(page(4).count_entries().await.unwrap(), 5);
}

#[tokio::test]
async fn test_unread_count_tracks_visibility_and_status() {
    let db = test_db().await;
    let user = db.create_user("reader").await.unwrap();
    let visible = subscribe(&db, user.id, "Tech", "https://a.example/feed").await;
    let hidden = subscribe(&db, user.id, "Tech", "https://b.example/feed").await;
    db.set_feed_hide_globally(user.id, hidden, true).await.unwrap();

    let shown = db
        .refresh_feed_entries(user.id, visible, &[item("v1", T0, &[]), item("v2", T0, &[])], false)
        .await
        .unwrap();
    db.refresh_feed_entries(user.id, hidden, &[item("h1", T0, &[])], false)
        .await
        .unwrap();
    assert_eq!(db.count_unread_entries(user.id).await.unwrap(), 2);

    let visible_updated = db
        .set_entries_status_count(user.id, &[shown[0].id], EntryStatus::Read)
        .await
        .unwrap();
    assert_eq!(visible_updated, 1);
    assert_eq!(db.count_unread_entries(user.id).await.unwrap(), 1);

    assert_eq!(db.mark_globally_visible_feeds_as_read(user.id).await.unwrap(), 1);
    assert_eq!(db.count_unread_entries(user.id).await.unwrap(), 0);
    let hidden_unread = db
        .new_entry_query_builder(user.id)
        .with_feed_id(hidden)
        .with_status(EntryStatus::Unread)
        .count_entries()
        .await
        .unwrap();
    assert_eq!(hidden_unread, 1);
}

#[tokio::test]
async fn test_changed_after_sees_status_changes() {
    let clock = Arc::new(FixedClock::new(T0));
    let db = Database::open(":memory:")
        .await
        .unwrap()
        .with_clock(clock.clone())
        .with_spawner(Arc::new(QueuedSpawner::new()));
    let user = db.create_user("reader").await.unwrap();
    let feed = subscribe(&db, user.id, "Tech", "https://a.example/feed").await;
    let created = db
        .refresh_feed_entries(user.id, feed, &[item("a", T0, &[]), item("b", T0, &[])], false)
        .await
        .unwrap();

    clock.advance(30);
    db.set_entries_status(user.id, &[created[1].id], EntryStatus::Read).await.unwrap();

    let changed = db
        .new_entry_query_builder(user.id)
        .changed_after(T0)
        .get_entry_ids()
        .await
        .unwrap();
    assert_eq!(changed, vec![created[1].id]);
}
