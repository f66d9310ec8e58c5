//! Fixtures shared by the storage unit tests.

use std::sync::Arc;

use super::schema::Database;
use super::types::{CandidateEntry, NewFeed};
use crate::clock::FixedClock;
use crate::tasks::QueuedSpawner;

pub(crate) const T0: i64 = 1_700_000_000;

pub(crate) struct TestEnv {
    pub db: Database,
    pub clock: Arc<FixedClock>,
    pub spawner: Arc<QueuedSpawner>,
}

pub(crate) async fn test_env() -> TestEnv {
    let clock = Arc::new(FixedClock::new(T0));
    let spawner = Arc::new(QueuedSpawner::new());
    let db = Database::open(":memory:")
        .await
        .unwrap()
        .with_clock(clock.clone())
        .with_spawner(spawner.clone());
    TestEnv { db, clock, spawner }
}

pub(crate) async fn test_db() -> Database {
    test_env().await.db
}

/// Create a user with one category and one feed; returns `(user_id, feed_id)`.
pub(crate) async fn seed_feed(db: &Database) -> (i64, i64) {
    let user = db.create_user(&format!("user-{}", T0)).await.unwrap();
    let feed_id = add_feed(db, user.id, "https://example.com/feed.xml").await;
    (user.id, feed_id)
}

/// Add a feed for `user_id` under a category of its own.
pub(crate) async fn add_feed(db: &Database, user_id: i64, feed_url: &str) -> i64 {
    let category = db.create_category(user_id, feed_url, false).await.unwrap();
    db.create_feed(
        user_id,
        &NewFeed {
            category_id: category.id,
            title: format!("Feed {feed_url}"),
            feed_url: feed_url.to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .id
}

pub(crate) fn candidate(hash: &str) -> CandidateEntry {
    CandidateEntry {
        hash: hash.to_string(),
        title: format!("Title {hash}"),
        url: format!("https://example.com/{hash}"),
        content: format!("Content of {hash}"),
        published_at: T0,
        ..Default::default()
    }
}
