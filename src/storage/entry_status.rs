use sqlx::{QueryBuilder, Sqlite};

use super::conditions::push_id_list;
use super::schema::Database;
use super::types::{DatabaseError, EntryStatus};
use crate::util::random_share_code;

const SECONDS_PER_DAY: i64 = 86_400;

// ============================================================================
// Status & Bookmark Operations
// ============================================================================

impl Database {
    /// Set `status` on the given entries of one user. Empty `entry_ids` is a
    /// no-op.
    pub async fn set_entries_status(
        &self,
        user_id: i64,
        entry_ids: &[i64],
        status: EntryStatus,
    ) -> Result<(), DatabaseError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE entries SET status = ");
        qb.push_bind(status.as_str());
        qb.push(", changed_at = ");
        qb.push_bind(self.now());
        qb.push(" WHERE user_id = ");
        qb.push_bind(user_id);
        qb.push(" AND id IN ");
        push_id_list(&mut qb, entry_ids);

        let result = qb.build().execute(&self.pool).await.map_err(|e| {
            DatabaseError::query(format!("unable to update entries statuses {:?}", entry_ids), e)
        })?;

        tracing::debug!(
            user_id,
            status = %status,
            count = result.rows_affected(),
            "Updated entries status"
        );
        Ok(())
    }

    /// Like [`Database::set_entries_status`], then count how many of the
    /// entries are visible on global lists (feed and category not hidden).
    pub async fn set_entries_status_count(
        &self,
        user_id: i64,
        entry_ids: &[i64],
        status: EntryStatus,
    ) -> Result<i64, DatabaseError> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        self.set_entries_status(user_id, entry_ids, status).await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT count(*) FROM entries e \
             JOIN feeds f ON f.id = e.feed_id \
             JOIN categories c ON c.id = f.category_id \
             WHERE e.user_id = ",
        );
        qb.push_bind(user_id);
        qb.push(" AND e.id IN ");
        push_id_list(&mut qb, entry_ids);
        qb.push(" AND f.hide_globally = 0 AND c.hide_globally = 0");

        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to count visible entries", e))
    }

    /// Star or unstar entries. Fails with `NothingUpdated` when none of the
    /// ids belong to the user.
    pub async fn set_entries_bookmarked_state(
        &self,
        user_id: i64,
        entry_ids: &[i64],
        starred: bool,
    ) -> Result<(), DatabaseError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE entries SET starred = ");
        qb.push_bind(starred);
        qb.push(", changed_at = ");
        qb.push_bind(self.now());
        qb.push(" WHERE user_id = ");
        qb.push_bind(user_id);
        qb.push(" AND id IN ");
        push_id_list(&mut qb, entry_ids);

        let result = qb.build().execute(&self.pool).await.map_err(|e| {
            DatabaseError::query(format!("unable to update bookmark state {:?}", entry_ids), e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }

    /// Flip the starred flag of one entry.
    pub async fn toggle_bookmark(&self, user_id: i64, entry_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries
            SET starred = CASE WHEN starred = 1 THEN 0 ELSE 1 END, changed_at = ?
            WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(self.now())
        .bind(user_id)
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to toggle bookmark of entry #{}", entry_id), e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Move up to `limit` of the oldest entries in `status` that were created
    /// more than `days` ago to `removed`, across all users.
    ///
    /// Starred and shared entries are exempt. `changed_at` is left untouched.
    /// Negative `days` or non-positive `limit` is a no-op, and so is a `days`
    /// reaching past the representable time range.
    pub async fn archive_entries(
        &self,
        status: EntryStatus,
        days: i64,
        limit: i64,
    ) -> Result<u64, DatabaseError> {
        if days < 0 || limit <= 0 {
            return Ok(0);
        }
        let Some(cutoff) = days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|span| self.now().checked_sub(span))
        else {
            tracing::debug!(status = %status, days, "Archive cutoff out of range, skipping");
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            UPDATE entries SET status = ?
            WHERE id IN (
                SELECT id FROM entries
                WHERE status = ?
                  AND starred = 0
                  AND share_code = ''
                  AND created_at < ?
                ORDER BY created_at ASC
                LIMIT ?
            )
            "#,
        )
        .bind(EntryStatus::Removed.as_str())
        .bind(status.as_str())
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to archive {} entries", status), e)
        })?;

        tracing::debug!(
            status = %status,
            days,
            count = result.rows_affected(),
            "Archived entries"
        );
        Ok(result.rows_affected())
    }

    /// Move a user's read entries to `removed`, keeping starred and shared
    /// ones.
    pub async fn flush_history(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries SET status = ?, changed_at = ?
            WHERE user_id = ? AND status = ? AND starred = 0 AND share_code = ''
            "#,
        )
        .bind(EntryStatus::Removed.as_str())
        .bind(self.now())
        .bind(user_id)
        .bind(EntryStatus::Read.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::query("unable to flush history", e))?;

        tracing::debug!(user_id, count = result.rows_affected(), "Flushed history");
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Mark as Read
    // ========================================================================

    /// Mark every unread entry of the user as read.
    pub async fn mark_all_as_read(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE entries SET status = ?, changed_at = ? WHERE user_id = ? AND status = ?",
        )
        .bind(EntryStatus::Read.as_str())
        .bind(self.now())
        .bind(user_id)
        .bind(EntryStatus::Unread.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::query("unable to mark all entries as read", e))?;

        tracing::debug!(user_id, count = result.rows_affected(), "Marked all entries as read");
        Ok(result.rows_affected())
    }

    /// Mark unread entries published before `before` as read.
    pub async fn mark_all_as_read_before(
        &self,
        user_id: i64,
        before: i64,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries SET status = ?, changed_at = ?
            WHERE user_id = ? AND status = ? AND published_at < ?
            "#,
        )
        .bind(EntryStatus::Read.as_str())
        .bind(self.now())
        .bind(user_id)
        .bind(EntryStatus::Unread.as_str())
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::query("unable to mark entries as read", e))?;

        tracing::debug!(
            user_id,
            before,
            count = result.rows_affected(),
            "Marked entries as read"
        );
        Ok(result.rows_affected())
    }

    /// Mark unread entries of one feed published before `before` as read.
    pub async fn mark_feed_as_read(
        &self,
        user_id: i64,
        feed_id: i64,
        before: i64,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries SET status = ?, changed_at = ?
            WHERE user_id = ? AND feed_id = ? AND status = ? AND published_at < ?
            "#,
        )
        .bind(EntryStatus::Read.as_str())
        .bind(self.now())
        .bind(user_id)
        .bind(feed_id)
        .bind(EntryStatus::Unread.as_str())
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to mark feed #{} as read", feed_id), e)
        })?;

        tracing::debug!(
            user_id,
            feed_id,
            count = result.rows_affected(),
            "Marked feed entries as read"
        );
        Ok(result.rows_affected())
    }

    /// Mark unread entries of every feed in a category, published before
    /// `before`, as read.
    pub async fn mark_category_as_read(
        &self,
        user_id: i64,
        category_id: i64,
        before: i64,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries SET status = ?, changed_at = ?
            WHERE user_id = ? AND status = ? AND published_at < ?
              AND feed_id IN (SELECT id FROM feeds WHERE user_id = ? AND category_id = ?)
            "#,
        )
        .bind(EntryStatus::Read.as_str())
        .bind(self.now())
        .bind(user_id)
        .bind(EntryStatus::Unread.as_str())
        .bind(before)
        .bind(user_id)
        .bind(category_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to mark category #{} as read", category_id), e)
        })?;

        tracing::debug!(
            user_id,
            category_id,
            count = result.rows_affected(),
            "Marked category entries as read"
        );
        Ok(result.rows_affected())
    }

    /// Mark unread entries of feeds shown on global lists as read. A feed is
    /// hidden when either its own flag or its category's flag is set.
    pub async fn mark_globally_visible_feeds_as_read(
        &self,
        user_id: i64,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries SET status = ?, changed_at = ?
            WHERE user_id = ? AND status = ?
              AND feed_id IN (
                SELECT f.id FROM feeds f
                JOIN categories c ON c.id = f.category_id
                WHERE f.user_id = ? AND f.hide_globally = 0 AND c.hide_globally = 0
              )
            "#,
        )
        .bind(EntryStatus::Read.as_str())
        .bind(self.now())
        .bind(user_id)
        .bind(EntryStatus::Unread.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::query("unable to mark visible feeds as read", e))?;

        tracing::debug!(
            user_id,
            count = result.rows_affected(),
            "Marked globally visible entries as read"
        );
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Sharing
    // ========================================================================

    /// Share code of an entry, generating one on first use. `None` when the
    /// entry does not belong to the user.
    pub async fn entry_share_code(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<Option<String>, DatabaseError> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT share_code FROM entries WHERE user_id = ? AND id = ?")
                .bind(user_id)
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    DatabaseError::query(
                        format!("unable to fetch share code of entry #{}", entry_id),
                        e,
                    )
                })?;

        let Some(existing) = existing else {
            return Ok(None);
        };
        if !existing.is_empty() {
            return Ok(Some(existing));
        }

        let share_code = random_share_code();
        sqlx::query("UPDATE entries SET share_code = ? WHERE user_id = ? AND id = ?")
            .bind(&share_code)
            .bind(user_id)
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::query(format!("unable to set share code of entry #{}", entry_id), e)
            })?;

        Ok(Some(share_code))
    }

    /// Clear the share code of an entry.
    pub async fn unshare_entry(&self, user_id: i64, entry_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE entries SET share_code = '' WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::query(format!("unable to remove share code of entry #{}", entry_id), e)
            })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }
}
