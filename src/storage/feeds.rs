use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedFetchState, NewFeed};

/// Rows deleted per statement while removing a feed's entries.
const ENTRY_DELETE_BATCH: i64 = 500;

const FEED_COLUMNS: &str = "id, user_id, category_id, title, feed_url, site_url, etag_header, \
     last_modified_header, checked_at, next_check_at, parsing_error_msg, \
     parsing_error_count, hide_globally";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a user to a feed.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Conflict` when the user already has a feed with this
    /// URL, `DatabaseError::InvalidInput` for an empty URL.
    pub async fn create_feed(&self, user_id: i64, feed: &NewFeed) -> Result<Feed, DatabaseError> {
        let feed_url = feed.feed_url.trim();
        if feed_url.is_empty() {
            return Err(DatabaseError::InvalidInput("feed URL cannot be empty".to_string()));
        }
        let title = if feed.title.trim().is_empty() {
            feed_url
        } else {
            feed.title.trim()
        };

        let sql = format!(
            "INSERT INTO feeds (user_id, category_id, title, feed_url, site_url, hide_globally) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        );
        let created: Feed = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(feed.category_id)
            .bind(title)
            .bind(feed_url)
            .bind(&feed.site_url)
            .bind(feed.hide_globally)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::query(format!("unable to create feed {:?}", feed_url), e))?;

        tracing::debug!(user_id, feed_id = created.id, "Created feed");
        Ok(created)
    }

    pub async fn feed_by_id(&self, user_id: i64, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? AND id = ?");
        sqlx::query_as(&sql)
            .bind(user_id)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::query(format!("unable to fetch feed #{}", feed_id), e))
    }

    /// All feeds of a user, ordered by title.
    pub async fn feeds(&self, user_id: i64) -> Result<Vec<Feed>, DatabaseError> {
        let sql = format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? ORDER BY title COLLATE NOCASE, id"
        );
        sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to fetch feeds", e))
    }

    pub async fn set_feed_hide_globally(
        &self,
        user_id: i64,
        feed_id: i64,
        hide: bool,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET hide_globally = ? WHERE user_id = ? AND id = ?")
            .bind(hide)
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::query(format!("unable to update feed #{}", feed_id), e))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }

    /// Record a successful fetch: caching headers, schedule, and a cleared
    /// error state.
    pub async fn update_feed_fetch_state(
        &self,
        user_id: i64,
        feed_id: i64,
        state: &FeedFetchState,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                etag_header = ?,
                last_modified_header = ?,
                checked_at = ?,
                next_check_at = ?,
                parsing_error_msg = '',
                parsing_error_count = 0
            WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(&state.etag_header)
        .bind(&state.last_modified_header)
        .bind(state.checked_at)
        .bind(state.next_check_at)
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to update fetch state of feed #{}", feed_id), e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }

    /// Record a failed fetch. Returns the new consecutive error count.
    pub async fn record_feed_error(
        &self,
        user_id: i64,
        feed_id: i64,
        message: &str,
        next_check_at: i64,
    ) -> Result<i64, DatabaseError> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE feeds SET
                parsing_error_msg = ?,
                parsing_error_count = parsing_error_count + 1,
                checked_at = ?,
                next_check_at = ?
            WHERE user_id = ? AND id = ?
            RETURNING parsing_error_count
            "#,
        )
        .bind(message)
        .bind(self.now())
        .bind(next_check_at)
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to record error of feed #{}", feed_id), e)
        })?;

        let count = count.ok_or(DatabaseError::NothingUpdated)?;
        tracing::warn!(user_id, feed_id, count, error = %message, "Feed refresh failed");
        Ok(count)
    }

    /// Clear the error state of every feed of a user.
    pub async fn reset_feed_errors(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE feeds SET parsing_error_msg = '', parsing_error_count = 0 WHERE user_id = ?",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::query("unable to reset feed errors", e))?;
        Ok(result.rows_affected())
    }

    /// Delete a feed and everything attached to it.
    ///
    /// Entries go first, in bounded batches, so no single statement holds
    /// the write lock for the whole feed.
    pub async fn remove_feed(&self, user_id: i64, feed_id: i64) -> Result<(), DatabaseError> {
        let mut deleted_entries = 0;
        loop {
            let result = sqlx::query(
                r#"
                DELETE FROM entries WHERE id IN (
                    SELECT id FROM entries WHERE user_id = ? AND feed_id = ? LIMIT ?
                )
                "#,
            )
            .bind(user_id)
            .bind(feed_id)
            .bind(ENTRY_DELETE_BATCH)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::query(format!("unable to delete entries of feed #{}", feed_id), e)
            })?;
            if result.rows_affected() == 0 {
                break;
            }
            deleted_entries += result.rows_affected();
        }

        let result = sqlx::query("DELETE FROM feeds WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::query(format!("unable to remove feed #{}", feed_id), e))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        tracing::debug!(user_id, feed_id, deleted_entries, "Removed feed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{add_feed, candidate, seed_feed, test_env, T0};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_lookup_feed() {
        let env = test_env().await;
        let (user_id, feed_id) = seed_feed(&env.db).await;

        let feed = env.db.feed_by_id(user_id, feed_id).await.unwrap().unwrap();
        assert_eq!(feed.feed_url, "https://example.com/feed.xml");
        assert_eq!(feed.parsing_error_count, 0);
        assert!(!feed.hide_globally);
        assert_eq!(feed.checked_at, None);

        assert!(env.db.feed_by_id(user_id + 1, feed_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_feed_url_is_conflict() {
        let env = test_env().await;
        let (user_id, feed_id) = seed_feed(&env.db).await;
        let feed = env.db.feed_by_id(user_id, feed_id).await.unwrap().unwrap();

        let err = env
            .db
            .create_feed(
                user_id,
                &NewFeed {
                    category_id: feed.category_id,
                    feed_url: feed.feed_url.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_empty_feed_url_rejected() {
        let env = test_env().await;
        let (user_id, _) = seed_feed(&env.db).await;
        let err = env
            .db
            .create_feed(user_id, &NewFeed { feed_url: "  ".to_string(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_error_count_increments_and_resets_on_success() {
        let env = test_env().await;
        let (user_id, feed_id) = seed_feed(&env.db).await;

        assert_eq!(env.db.record_feed_error(user_id, feed_id, "timeout", T0 + 60).await.unwrap(), 1);
        assert_eq!(env.db.record_feed_error(user_id, feed_id, "timeout", T0 + 120).await.unwrap(), 2);

        env.db
            .update_feed_fetch_state(
                user_id,
                feed_id,
                &FeedFetchState {
                    etag_header: "\"abc\"".to_string(),
                    last_modified_header: "Tue, 01 Oct 2024 00:00:00 GMT".to_string(),
                    checked_at: T0,
                    next_check_at: T0 + 3600,
                },
            )
            .await
            .unwrap();

        let feed = env.db.feed_by_id(user_id, feed_id).await.unwrap().unwrap();
        assert_eq!(feed.parsing_error_count, 0);
        assert_eq!(feed.parsing_error_msg, "");
        assert_eq!(feed.etag_header, "\"abc\"");
        assert_eq!(feed.next_check_at, Some(T0 + 3600));
    }

    #[tokio::test]
    async fn test_reset_feed_errors() {
        let env = test_env().await;
        let (user_id, feed_id) = seed_feed(&env.db).await;
        env.db.record_feed_error(user_id, feed_id, "boom", T0).await.unwrap();
        assert_eq!(env.db.reset_feed_errors(user_id).await.unwrap(), 1);
        let feed = env.db.feed_by_id(user_id, feed_id).await.unwrap().unwrap();
        assert_eq!(feed.parsing_error_count, 0);
    }

    #[tokio::test]
    async fn test_remove_feed_deletes_entries() {
        let env = test_env().await;
        let (user_id, feed_id) = seed_feed(&env.db).await;
        let other = add_feed(&env.db, user_id, "https://keep.example/feed").await;
        env.db
            .refresh_feed_entries(user_id, feed_id, &[candidate("a"), candidate("b")], false)
            .await
            .unwrap();
        env.db.refresh_feed_entries(user_id, other, &[candidate("c")], false).await.unwrap();

        env.db.remove_feed(user_id, feed_id).await.unwrap();
        assert!(env.db.feed_by_id(user_id, feed_id).await.unwrap().is_none());
        assert_eq!(env.db.count_all_entries().await.unwrap().total, 1);

        let err = env.db.remove_feed(user_id, feed_id).await.unwrap_err();
        assert!(err.is_nothing_updated());
    }

    #[tokio::test]
    async fn test_feeds_listed_by_title() {
        let env = test_env().await;
        let user = env.db.create_user("lister").await.unwrap();
        add_feed(&env.db, user.id, "https://z.example").await;
        add_feed(&env.db, user.id, "https://a.example").await;
        let urls: Vec<String> = env
            .db
            .feeds(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.feed_url)
            .collect();
        assert_eq!(urls, vec!["https://a.example", "https://z.example"]);
    }
}
