use tracing::Instrument;

use super::schema::Database;
use super::types::{DatabaseError, EntryStatus};

// ============================================================================
// Stale Entry Reaper
// ============================================================================

impl Database {
    /// Delete removed entries of a feed whose hash is not in `hashes`.
    ///
    /// `hashes` is the set observed in the latest fetch. An empty set is a
    /// no-op so an empty or failed fetch never wipes history. Entries that
    /// are unread or read are never touched.
    pub async fn cleanup_entries(&self, feed_id: i64, hashes: &[String]) -> Result<u64, DatabaseError> {
        if hashes.is_empty() {
            return Ok(0);
        }

        // Bound as one JSON array so large feeds stay under the bind limit
        let hashes_json = serde_json::to_string(hashes).map_err(|source| {
            DatabaseError::InvalidTags {
                context: "unable to encode entry hashes".to_string(),
                source,
            }
        })?;

        let result = sqlx::query(
            r#"
            DELETE FROM entries
            WHERE feed_id = ? AND status = ?
              AND hash NOT IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(feed_id)
        .bind(EntryStatus::Removed.as_str())
        .bind(hashes_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to cleanup entries of feed #{}", feed_id), e)
        })?;

        tracing::debug!(
            feed_id,
            deleted = result.rows_affected(),
            "Cleaned up removed entries"
        );
        Ok(result.rows_affected())
    }
}

/// Schedule [`Database::cleanup_entries`] without waiting for it.
pub(super) fn spawn_entry_cleanup(db: &Database, user_id: i64, feed_id: i64, hashes: Vec<String>) {
    let worker = db.clone();
    let span = tracing::debug_span!("cleanup_entries", user_id, feed_id);
    let task = async move {
        worker
            .cleanup_entries(feed_id, &hashes)
            .await
            .map(|_| ())
            .inspect_err(|e| {
                tracing::error!(user_id, feed_id, error = %e, "Unable to cleanup removed entries");
            })
    };
    db.spawner.spawn("cleanup_entries", Box::pin(task.instrument(span)));
}
