use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::types::DatabaseError;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::tasks::{TaskSpawner, TokioSpawner};

// ============================================================================
// Database
// ============================================================================

/// Liveness probe budget for [`Database::ping`].
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool and connection tuning.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// SQLite is single-writer; extra connections only help readers
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_connections: config.max_connections,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    clock: Arc<dyn Clock>,
    pub(crate) spawner: Arc<dyn TaskSpawner>,
}

impl Database {
    /// Open a database with default options and create the schema.
    ///
    /// `":memory:"` opens a private in-memory database whose lifetime is
    /// tied to the pool.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        Self::open_with(path, &StoreOptions::default()).await
    }

    /// Open a database and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if another process holds the database
    /// lock past the busy timeout, `DatabaseError::Migration` if the schema
    /// cannot be created, and `DatabaseError::Other` for anything else.
    pub async fn open_with(path: &str, options: &StoreOptions) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        let mut connect = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);
        if !in_memory {
            connect = connect
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout);
        if in_memory {
            // The shared in-memory database is dropped with its last connection
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self {
            pool,
            clock: Arc::new(SystemClock),
            spawner: Arc::new(TokioSpawner),
        };
        db.migrate().await.map_err(|e| match e {
            DatabaseError::Locked(_) => e,
            other => DatabaseError::Migration(other.to_string()),
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the background task runner.
    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::begin("migrate", e))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::query("unable to create schema", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::commit("migrate", e))?;
        Ok(())
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(PING_TIMEOUT, probe).await {
            Ok(result) => result
                .map(|_| ())
                .map_err(|e| DatabaseError::query("unable to ping database", e)),
            Err(_) => Err(DatabaseError::Timeout("database ping")),
        }
    }

    /// SQLite library version backing the pool.
    pub async fn database_version(&self) -> Result<String, DatabaseError> {
        sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to fetch database version", e))
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ============================================================================
// Schema
// ============================================================================

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        hide_globally INTEGER NOT NULL DEFAULT 0,
        UNIQUE (user_id, title)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        feed_url TEXT NOT NULL,
        site_url TEXT NOT NULL DEFAULT '',
        etag_header TEXT NOT NULL DEFAULT '',
        last_modified_header TEXT NOT NULL DEFAULT '',
        checked_at INTEGER,
        next_check_at INTEGER,
        parsing_error_msg TEXT NOT NULL DEFAULT '',
        parsing_error_count INTEGER NOT NULL DEFAULT 0,
        hide_globally INTEGER NOT NULL DEFAULT 0,
        UNIQUE (user_id, feed_url)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_feeds_user_category ON feeds(user_id, category_id)",
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
        hash TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        comments_url TEXT NOT NULL DEFAULT '',
        author TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        reading_time INTEGER NOT NULL DEFAULT 0,
        published_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        changed_at INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'unread'
            CHECK (status IN ('unread', 'read', 'removed')),
        starred INTEGER NOT NULL DEFAULT 0,
        share_code TEXT NOT NULL DEFAULT '',
        UNIQUE (feed_id, hash)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_share_code ON entries(share_code) WHERE share_code <> ''",
    "CREATE INDEX IF NOT EXISTS idx_entries_user_status ON entries(user_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_entries_feed_status ON entries(feed_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_entries_user_published ON entries(user_id, published_at)",
    "CREATE INDEX IF NOT EXISTS idx_entries_user_created ON entries(user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_entries_user_starred ON entries(user_id, starred)",
    "CREATE INDEX IF NOT EXISTS idx_entries_status_created ON entries(status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS enclosures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        mime_type TEXT NOT NULL DEFAULT '',
        size INTEGER NOT NULL DEFAULT 0,
        media_progression INTEGER NOT NULL DEFAULT 0,
        UNIQUE (entry_id, url)
    )
    "#,
];
