use sqlx::SqliteConnection;

use super::cleanup;
use super::enclosures::{update_enclosures, upsert_enclosures};
use super::entry_query::{ENTRY_COLUMNS, ENTRY_FROM};
use super::schema::Database;
use super::types::{
    encode_tags, CandidateEntry, DatabaseError, Entry, EntryCounts, EntryDbRow, EntryStatus,
};

// ============================================================================
// Entry Reconciler
// ============================================================================

impl Database {
    /// Reconcile a freshly fetched batch of candidates with stored entries.
    ///
    /// Each candidate runs in its own transaction: unseen `(feed_id, hash)`
    /// pairs are inserted as unread, seen ones are refreshed when
    /// `update_existing` is set and otherwise left alone. Returns the entries
    /// created by this call, in candidate order.
    ///
    /// The batch is not atomic. If candidate k fails, its transaction is
    /// rolled back and the error returned, but candidates before k stay
    /// committed. The stale entry sweep is scheduled only after the whole
    /// batch succeeds.
    pub async fn refresh_feed_entries(
        &self,
        user_id: i64,
        feed_id: i64,
        candidates: &[CandidateEntry],
        update_existing: bool,
    ) -> Result<Vec<Entry>, DatabaseError> {
        let mut created = Vec::new();
        let mut hashes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DatabaseError::begin("refresh feed entries", e))?;

            let result = self
                .reconcile_candidate(&mut tx, user_id, feed_id, candidate, update_existing)
                .await;

            match result {
                Ok(entry) => {
                    tx.commit()
                        .await
                        .map_err(|e| DatabaseError::commit("refresh feed entries", e))?;
                    if let Some(entry) = entry {
                        created.push(entry);
                    }
                }
                Err(err) => {
                    if let Err(rollback) = tx.rollback().await {
                        return Err(DatabaseError::rollback_failed(rollback, err));
                    }
                    tracing::warn!(
                        user_id,
                        feed_id,
                        hash = %candidate.hash,
                        error = %err,
                        "Entry reconciliation aborted"
                    );
                    return Err(err);
                }
            }

            hashes.push(candidate.hash.clone());
        }

        tracing::debug!(
            user_id,
            feed_id,
            candidates = candidates.len(),
            created = created.len(),
            "Refreshed feed entries"
        );

        cleanup::spawn_entry_cleanup(self, user_id, feed_id, hashes);
        Ok(created)
    }

    async fn reconcile_candidate(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        feed_id: i64,
        candidate: &CandidateEntry,
        update_existing: bool,
    ) -> Result<Option<Entry>, DatabaseError> {
        if entry_exists(conn, feed_id, &candidate.hash).await? {
            if update_existing {
                self.update_entry(conn, user_id, feed_id, candidate).await?;
            }
            return Ok(None);
        }
        let entry = self.create_entry(conn, user_id, feed_id, candidate).await?;
        Ok(Some(entry))
    }

    async fn create_entry(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        feed_id: i64,
        candidate: &CandidateEntry,
    ) -> Result<Entry, DatabaseError> {
        let now = self.now();
        let tags = encode_tags(&candidate.tags)?;

        let entry_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entries (
                user_id, feed_id, hash, title, url, comments_url, author, content,
                tags, reading_time, published_at, created_at, changed_at, status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(&candidate.hash)
        .bind(&candidate.title)
        .bind(&candidate.url)
        .bind(&candidate.comments_url)
        .bind(&candidate.author)
        .bind(&candidate.content)
        .bind(tags)
        .bind(candidate.reading_time)
        .bind(candidate.published_at)
        .bind(now)
        .bind(now)
        .bind(EntryStatus::Unread.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            DatabaseError::query(
                format!("unable to create entry {:?} (feed #{})", candidate.url, feed_id),
                e,
            )
        })?;

        let enclosures = upsert_enclosures(conn, user_id, entry_id, &candidate.enclosures).await?;

        let mut entry = fetch_entry(conn, entry_id).await?;
        entry.enclosures = enclosures;
        Ok(entry)
    }

    /// Refresh the mutable fields of an existing entry.
    ///
    /// Status, starred, share code, `published_at` and `created_at` are
    /// preserved.
    async fn update_entry(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        feed_id: i64,
        candidate: &CandidateEntry,
    ) -> Result<(), DatabaseError> {
        let tags = encode_tags(&candidate.tags)?;

        let entry_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE entries SET
                title = ?,
                url = ?,
                comments_url = ?,
                content = ?,
                author = ?,
                reading_time = ?,
                tags = ?,
                changed_at = ?
            WHERE user_id = ? AND feed_id = ? AND hash = ?
            RETURNING id
            "#,
        )
        .bind(&candidate.title)
        .bind(&candidate.url)
        .bind(&candidate.comments_url)
        .bind(&candidate.content)
        .bind(&candidate.author)
        .bind(candidate.reading_time)
        .bind(tags)
        .bind(self.now())
        .bind(user_id)
        .bind(feed_id)
        .bind(&candidate.hash)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            DatabaseError::query(
                format!("unable to update entry {:?} (feed #{})", candidate.url, feed_id),
                e,
            )
        })?;

        let Some(entry_id) = entry_id else {
            return Err(DatabaseError::NothingUpdated);
        };

        update_enclosures(conn, user_id, entry_id, &candidate.enclosures).await
    }

    /// True when no entry with this hash has been stored for the feed.
    pub async fn is_new_entry(&self, feed_id: i64, hash: &str) -> Result<bool, DatabaseError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(!entry_exists(&mut conn, feed_id, hash).await?)
    }

    /// Stored reading time of an entry, or 0 when it does not exist yet.
    pub async fn get_read_time(&self, feed_id: i64, hash: &str) -> Result<i64, DatabaseError> {
        let reading_time: Option<i64> =
            sqlx::query_scalar("SELECT reading_time FROM entries WHERE feed_id = ? AND hash = ?")
                .bind(feed_id)
                .bind(hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DatabaseError::query("unable to fetch entry reading time", e))?;
        Ok(reading_time.unwrap_or(0))
    }

    /// Overwrite title, content and reading time of one entry.
    pub async fn update_entry_title_and_content(&self, entry: &Entry) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE entries SET title = ?, content = ?, reading_time = ?, changed_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(entry.reading_time)
        .bind(self.now())
        .bind(entry.id)
        .bind(entry.user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::query(format!("unable to update entry #{}", entry.id), e))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }

    /// Entry totals per status across all users.
    pub async fn count_all_entries(&self) -> Result<EntryCounts, DatabaseError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, count(*) FROM entries GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::query("unable to count entries", e))?;

        let mut counts = EntryCounts::default();
        for (status, count) in rows {
            match status.parse::<EntryStatus>()? {
                EntryStatus::Unread => counts.unread = count,
                EntryStatus::Read => counts.read = count,
                EntryStatus::Removed => counts.removed = count,
            }
            counts.total += count;
        }
        Ok(counts)
    }

    /// Unread entries of a user that are visible on the global unread list.
    pub async fn count_unread_entries(&self, user_id: i64) -> Result<i64, DatabaseError> {
        self.new_entry_query_builder(user_id)
            .with_status(EntryStatus::Unread)
            .with_globally_visible()
            .count_entries()
            .await
    }
}

async fn entry_exists(
    conn: &mut SqliteConnection,
    feed_id: i64,
    hash: &str,
) -> Result<bool, DatabaseError> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM entries WHERE feed_id = ? AND hash = ? LIMIT 1")
            .bind(feed_id)
            .bind(hash)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                DatabaseError::query(
                    format!("unable to check if entry exists (feed #{})", feed_id),
                    e,
                )
            })?;
    Ok(found.is_some())
}

async fn fetch_entry(conn: &mut SqliteConnection, entry_id: i64) -> Result<Entry, DatabaseError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} {ENTRY_FROM} WHERE e.id = ?");
    let row: EntryDbRow = sqlx::query_as(&sql)
        .bind(entry_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| DatabaseError::query(format!("unable to fetch entry #{}", entry_id), e))?;
    row.into_entry()
}
