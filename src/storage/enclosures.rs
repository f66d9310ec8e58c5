use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::conditions::push_id_list;
use super::schema::Database;
use super::types::{CandidateEnclosure, DatabaseError, Enclosure, Entry};

/// Maximum ids bound into one `IN (...)` lookup.
const ENCLOSURE_BATCH_SIZE: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct EnclosureRow {
    id: i64,
    user_id: i64,
    entry_id: i64,
    url: String,
    mime_type: String,
    size: i64,
    media_progression: i64,
}

impl From<EnclosureRow> for Enclosure {
    fn from(row: EnclosureRow) -> Self {
        Enclosure {
            id: row.id,
            user_id: row.user_id,
            entry_id: row.entry_id,
            url: row.url,
            mime_type: row.mime_type,
            size: row.size,
            media_progression: row.media_progression,
        }
    }
}

/// Insert or refresh the given enclosures of one entry.
///
/// Blank URLs are skipped. A URL already attached to the entry keeps its id
/// and playback position; only size and mime type are refreshed.
pub(crate) async fn upsert_enclosures(
    conn: &mut SqliteConnection,
    user_id: i64,
    entry_id: i64,
    enclosures: &[CandidateEnclosure],
) -> Result<Vec<Enclosure>, DatabaseError> {
    let mut stored: Vec<Enclosure> = Vec::with_capacity(enclosures.len());
    for enclosure in enclosures {
        let url = enclosure.url.trim();
        if url.is_empty() {
            continue;
        }
        let row: EnclosureRow = sqlx::query_as(
            r#"
            INSERT INTO enclosures (user_id, entry_id, url, mime_type, size)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (entry_id, url) DO UPDATE SET
                mime_type = excluded.mime_type,
                size = excluded.size
            RETURNING id, user_id, entry_id, url, mime_type, size, media_progression
            "#,
        )
        .bind(user_id)
        .bind(entry_id)
        .bind(url)
        .bind(&enclosure.mime_type)
        .bind(enclosure.size)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            DatabaseError::query(
                format!("unable to store enclosure {:?} of entry #{}", url, entry_id),
                e,
            )
        })?;

        // A repeated URL in the same list refreshes the row already returned
        if let Some(pos) = stored.iter().position(|e| e.id == row.id) {
            stored[pos] = row.into();
        } else {
            stored.push(row.into());
        }
    }
    Ok(stored)
}

/// Bring an existing entry's enclosures in line with a fresh candidate list.
///
/// A list without any usable URL leaves the stored enclosures untouched:
/// feeds that stop advertising media do not erase known attachments.
pub(crate) async fn update_enclosures(
    conn: &mut SqliteConnection,
    user_id: i64,
    entry_id: i64,
    enclosures: &[CandidateEnclosure],
) -> Result<(), DatabaseError> {
    if enclosures.iter().all(|e| e.url.trim().is_empty()) {
        return Ok(());
    }

    let stored = upsert_enclosures(conn, user_id, entry_id, enclosures).await?;
    let urls: Vec<&str> = stored.iter().map(|e| e.url.as_str()).collect();
    let urls_json = serde_json::to_string(&urls).map_err(|source| DatabaseError::InvalidTags {
        context: "unable to encode enclosure urls".to_string(),
        source,
    })?;

    let result = sqlx::query(
        r#"
        DELETE FROM enclosures
        WHERE user_id = ? AND entry_id = ?
          AND url NOT IN (SELECT value FROM json_each(?))
        "#,
    )
    .bind(user_id)
    .bind(entry_id)
    .bind(urls_json)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        DatabaseError::query(
            format!("unable to delete stale enclosures of entry #{}", entry_id),
            e,
        )
    })?;

    if result.rows_affected() > 0 {
        tracing::debug!(
            entry_id,
            removed = result.rows_affected(),
            "Removed stale enclosures"
        );
    }
    Ok(())
}

impl Database {
    /// Load enclosures for every entry in `entries`, batched by id.
    pub(crate) async fn attach_enclosures(&self, entries: &mut [Entry]) -> Result<(), DatabaseError> {
        if entries.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let mut by_entry: HashMap<i64, Vec<Enclosure>> = HashMap::new();

        for chunk in ids.chunks(ENCLOSURE_BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, user_id, entry_id, url, mime_type, size, media_progression \
                 FROM enclosures WHERE entry_id IN ",
            );
            push_id_list(&mut qb, chunk);
            qb.push(" ORDER BY id ASC");

            let rows: Vec<EnclosureRow> = qb
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::query("unable to fetch enclosures", e))?;
            for row in rows {
                by_entry.entry(row.entry_id).or_default().push(row.into());
            }
        }

        for entry in entries.iter_mut() {
            entry.enclosures = by_entry.remove(&entry.id).unwrap_or_default();
        }
        Ok(())
    }

    /// Enclosures of one entry, oldest first.
    pub async fn entry_enclosures(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<Vec<Enclosure>, DatabaseError> {
        let rows: Vec<EnclosureRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, entry_id, url, mime_type, size, media_progression
            FROM enclosures
            WHERE user_id = ? AND entry_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(format!("unable to fetch enclosures of entry #{}", entry_id), e)
        })?;
        Ok(rows.into_iter().map(Enclosure::from).collect())
    }

    /// Record the playback position of an enclosure.
    pub async fn update_enclosure_media_progression(
        &self,
        user_id: i64,
        enclosure_id: i64,
        seconds: i64,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE enclosures SET media_progression = ? WHERE user_id = ? AND id = ?",
        )
        .bind(seconds.max(0))
        .bind(user_id)
        .bind(enclosure_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::query(
                format!("unable to update media progression of enclosure #{}", enclosure_id),
                e,
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }
}
