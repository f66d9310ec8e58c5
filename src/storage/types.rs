use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Transaction phase that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Begin,
    Commit,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPhase::Begin => f.write_str("start"),
            TxPhase::Commit => f.write_str("commit"),
        }
    }
}

/// Storage errors.
///
/// Single-row lookups that find nothing return `Ok(None)` rather than an
/// error. Everything else that can go wrong is one of these.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLITE_BUSY / SQLITE_LOCKED: another writer holds the lock
    #[error("{0}: database is locked")]
    Locked(String),

    /// Schema creation failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A uniqueness invariant was violated (duplicate hash in a feed,
    /// duplicate share code, duplicate feed URL, ...)
    #[error("{context}: {source}")]
    Conflict {
        context: String,
        source: sqlx::Error,
    },

    /// A write that was expected to touch at least one row touched none
    #[error("nothing has been updated")]
    NothingUpdated,

    /// Begin or commit failed
    #[error("unable to {phase} transaction ({operation}): {source}")]
    Transaction {
        phase: TxPhase,
        operation: &'static str,
        source: sqlx::Error,
    },

    /// Rollback failed while handling another error
    #[error("unable to rollback transaction: {rollback} (rolled back due to: {cause})")]
    RollbackFailed {
        rollback: sqlx::Error,
        cause: Box<DatabaseError>,
    },

    /// Statement failure with operation context
    #[error("{context}: {source}")]
    Query {
        context: String,
        source: sqlx::Error,
    },

    /// A status column held something other than unread/read/removed
    #[error("invalid entry status {0:?}")]
    InvalidStatus(String),

    /// Tags could not be encoded or decoded as a JSON array
    #[error("{context}: {source}")]
    InvalidTags {
        context: String,
        source: serde_json::Error,
    },

    /// Caller-supplied value rejected before reaching the database
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a connection-level sqlx error, detecting database locking.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err) {
            return DatabaseError::Locked("unable to open database".to_string());
        }
        DatabaseError::Other(err)
    }

    /// Wrap a statement error with the logical operation that issued it.
    pub(crate) fn query(context: impl Into<String>, err: sqlx::Error) -> Self {
        let context = context.into();
        if is_unique_violation(&err) {
            DatabaseError::Conflict {
                context,
                source: err,
            }
        } else if is_lock_error(&err) {
            DatabaseError::Locked(context)
        } else {
            DatabaseError::Query {
                context,
                source: err,
            }
        }
    }

    pub(crate) fn begin(operation: &'static str, err: sqlx::Error) -> Self {
        DatabaseError::Transaction {
            phase: TxPhase::Begin,
            operation,
            source: err,
        }
    }

    pub(crate) fn commit(operation: &'static str, err: sqlx::Error) -> Self {
        DatabaseError::Transaction {
            phase: TxPhase::Commit,
            operation,
            source: err,
        }
    }

    pub(crate) fn rollback_failed(rollback: sqlx::Error, cause: DatabaseError) -> Self {
        DatabaseError::RollbackFailed {
            rollback,
            cause: Box::new(cause),
        }
    }

    /// True for [`DatabaseError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict { .. })
    }

    /// True for [`DatabaseError::NothingUpdated`].
    pub fn is_nothing_updated(&self) -> bool {
        matches!(self, DatabaseError::NothingUpdated)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn is_lock_error(err: &sqlx::Error) -> bool {
    // SQLITE_BUSY (5): database is locked
    // SQLITE_LOCKED (6): database table is locked
    let error_string = err.to_string().to_lowercase();
    error_string.contains("database is locked")
        || error_string.contains("database table is locked")
        || error_string.contains("sqlite_busy")
        || error_string.contains("sqlite_locked")
}

// ============================================================================
// Entry Identity Model
// ============================================================================

/// Entry status state machine.
///
/// `unread` is the only initial state. Any state can move to any other
/// through the bulk status operations; reaping only ever touches `removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Unread,
    Read,
    Removed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Unread => "unread",
            EntryStatus::Read => "read",
            EntryStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(EntryStatus::Unread),
            "read" => Ok(EntryStatus::Read),
            "removed" => Ok(EntryStatus::Removed),
            other => Err(DatabaseError::InvalidStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Candidates (producer input)
// ============================================================================

/// One item from a freshly fetched feed, not yet reconciled with storage.
///
/// `hash` must be stable across fetches of the same item; see
/// [`crate::util::content_hash`].
#[derive(Debug, Clone, Default)]
pub struct CandidateEntry {
    pub hash: String,
    pub title: String,
    pub url: String,
    pub comments_url: String,
    pub author: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Estimated reading time in minutes
    pub reading_time: i64,
    /// Publication time from the source feed (Unix seconds)
    pub published_at: i64,
    pub enclosures: Vec<CandidateEnclosure>,
}

/// Media attachment advertised by a candidate entry.
#[derive(Debug, Clone, Default)]
pub struct CandidateEnclosure {
    pub url: String,
    pub mime_type: String,
    pub size: i64,
}

// ============================================================================
// Stored Data
// ============================================================================

/// Entry as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub hash: String,
    pub title: String,
    pub url: String,
    pub comments_url: String,
    pub author: String,
    pub content: String,
    pub tags: Vec<String>,
    pub reading_time: i64,
    pub published_at: i64,
    pub created_at: i64,
    pub changed_at: i64,
    pub status: EntryStatus,
    pub starred: bool,
    /// Empty when the entry is not shared
    pub share_code: String,
    /// Title of the owning feed
    pub feed_title: String,
    pub category_id: i64,
    pub enclosures: Vec<Enclosure>,
}

/// Media attachment owned by one entry, unique per `(entry_id, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enclosure {
    pub id: i64,
    pub user_id: i64,
    pub entry_id: i64,
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    /// Playback position in seconds
    pub media_progression: i64,
}

/// Previous/next neighbour returned by the pagination navigator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySibling {
    pub id: i64,
    pub title: String,
}

/// Entry totals across all users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryCounts {
    pub unread: i64,
    pub read: i64,
    pub removed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub hide_globally: bool,
}

/// Feed subscription plus the fetch bookkeeping the refresh scheduler keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub title: String,
    pub feed_url: String,
    pub site_url: String,
    pub etag_header: String,
    pub last_modified_header: String,
    pub checked_at: Option<i64>,
    pub next_check_at: Option<i64>,
    pub parsing_error_msg: String,
    pub parsing_error_count: i64,
    pub hide_globally: bool,
}

/// Fields needed to subscribe to a feed.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub category_id: i64,
    pub title: String,
    pub feed_url: String,
    pub site_url: String,
    pub hide_globally: bool,
}

/// HTTP caching headers and schedule recorded after a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FeedFetchState {
    pub etag_header: String,
    pub last_modified_header: String,
    pub checked_at: i64,
    pub next_check_at: i64,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for entry queries (used by sqlx FromRow).
/// Converts to Entry via into_entry(), which decodes status and tags.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub hash: String,
    pub title: String,
    pub url: String,
    pub comments_url: String,
    pub author: String,
    pub content: String,
    pub tags: String,
    pub reading_time: i64,
    pub published_at: i64,
    pub created_at: i64,
    pub changed_at: i64,
    pub status: String,
    pub starred: bool,
    pub share_code: String,
    pub feed_title: String,
    pub category_id: i64,
}

impl EntryDbRow {
    pub(crate) fn into_entry(self) -> Result<Entry, DatabaseError> {
        let status = self.status.parse()?;
        let tags = decode_tags(self.id, &self.tags)?;
        Ok(Entry {
            id: self.id,
            user_id: self.user_id,
            feed_id: self.feed_id,
            hash: self.hash,
            title: self.title,
            url: self.url,
            comments_url: self.comments_url,
            author: self.author,
            content: self.content,
            tags,
            reading_time: self.reading_time,
            published_at: self.published_at,
            created_at: self.created_at,
            changed_at: self.changed_at,
            status,
            starred: self.starred,
            share_code: self.share_code,
            feed_title: self.feed_title,
            category_id: self.category_id,
            enclosures: Vec::new(),
        })
    }
}

/// Serialize tags for the `entries.tags` column.
pub(crate) fn encode_tags(tags: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(tags).map_err(|source| DatabaseError::InvalidTags {
        context: "unable to encode entry tags".to_string(),
        source,
    })
}

fn decode_tags(entry_id: i64, raw: &str) -> Result<Vec<String>, DatabaseError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|source| DatabaseError::InvalidTags {
        context: format!("unable to decode tags of entry #{entry_id}"),
        source,
    })
}
