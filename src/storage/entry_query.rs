use sqlx::{QueryBuilder, Sqlite};

use super::conditions::{self, Conditions};
use super::schema::Database;
use super::types::{DatabaseError, Entry, EntryDbRow, EntryStatus};

/// Columns decoded into [`EntryDbRow`].
pub(crate) const ENTRY_COLUMNS: &str = "e.id, e.user_id, e.feed_id, e.hash, e.title, e.url, \
     e.comments_url, e.author, e.content, e.tags, e.reading_time, e.published_at, \
     e.created_at, e.changed_at, e.status, e.starred, e.share_code, \
     f.title AS feed_title, f.category_id";

/// Every entry read goes through the owning feed and category.
pub(crate) const ENTRY_FROM: &str =
    "FROM entries e JOIN feeds f ON f.id = e.feed_id JOIN categories c ON c.id = f.category_id";

// ============================================================================
// Ordering
// ============================================================================

/// Columns an entry list can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Status,
    Title,
    Author,
    PublishedAt,
    CreatedAt,
    ChangedAt,
    ReadingTime,
    /// Title of the owning feed
    FeedTitle,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::Id => "e.id",
            SortField::Status => "e.status",
            SortField::Title => "e.title",
            SortField::Author => "e.author",
            SortField::PublishedAt => "e.published_at",
            SortField::CreatedAt => "e.created_at",
            SortField::ChangedAt => "e.changed_at",
            SortField::ReadingTime => "e.reading_time",
            SortField::FeedTitle => "f.title",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

// ============================================================================
// Query Builder
// ============================================================================

/// Composable entry filter for one user.
///
/// Filters accumulate as typed predicates and are rendered only when a
/// terminal method runs, so a builder can be cloned, extended and executed
/// again. `count_entries` and `get_entries` share the same predicate set.
#[derive(Clone)]
pub struct EntryQueryBuilder {
    db: Database,
    conditions: Conditions,
    order: Vec<(SortField, SortDirection)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Database {
    pub fn new_entry_query_builder(&self, user_id: i64) -> EntryQueryBuilder {
        let mut conditions = Conditions::default();
        conditions.push(conditions::user_id_eq(user_id));
        EntryQueryBuilder {
            db: self.clone(),
            conditions,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

impl EntryQueryBuilder {
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.conditions.push(conditions::status_eq(status));
        self
    }

    /// Match any of `statuses`; an empty slice adds no filter.
    pub fn with_statuses(mut self, statuses: &[EntryStatus]) -> Self {
        if !statuses.is_empty() {
            self.conditions.push(conditions::status_in(statuses));
        }
        self
    }

    pub fn without_status(mut self, status: EntryStatus) -> Self {
        self.conditions.push(conditions::status_ne(status));
        self
    }

    /// Ignored when `feed_id <= 0`.
    pub fn with_feed_id(mut self, feed_id: i64) -> Self {
        if feed_id > 0 {
            self.conditions.push(conditions::feed_id_eq(feed_id));
        }
        self
    }

    /// Ignored when `category_id <= 0`.
    pub fn with_category_id(mut self, category_id: i64) -> Self {
        if category_id > 0 {
            self.conditions.push(conditions::category_id_eq(category_id));
        }
        self
    }

    pub fn with_starred(mut self, starred: bool) -> Self {
        self.conditions.push(conditions::starred(starred));
        self
    }

    /// Entries carrying every tag, compared case-insensitively.
    pub fn with_tags<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        for tag in tags {
            self.conditions.push(conditions::has_tag(tag.as_ref()));
        }
        self
    }

    /// Substring match on title or content; ignored when empty.
    pub fn with_search_query(mut self, query: &str) -> Self {
        if !query.is_empty() {
            self.conditions.push(conditions::search(query));
        }
        self
    }

    pub fn with_search_query_case_sensitive(mut self, query: &str) -> Self {
        if !query.is_empty() {
            self.conditions.push(conditions::search_case_sensitive(query));
        }
        self
    }

    /// Exclude entries whose feed or category is hidden from global lists.
    pub fn with_globally_visible(mut self) -> Self {
        self.conditions.push(conditions::globally_visible());
        self
    }

    pub fn with_entry_id(mut self, entry_id: i64) -> Self {
        self.conditions.push(conditions::entry_id_eq(entry_id));
        self
    }

    pub fn with_entry_ids(mut self, entry_ids: &[i64]) -> Self {
        self.conditions.push(conditions::entry_id_in(entry_ids));
        self
    }

    pub fn with_share_code(mut self, share_code: &str) -> Self {
        self.conditions.push(conditions::share_code_eq(share_code));
        self
    }

    pub fn published_after(mut self, timestamp: i64) -> Self {
        self.conditions.push(conditions::column_after("e.published_at", timestamp));
        self
    }

    pub fn published_before(mut self, timestamp: i64) -> Self {
        self.conditions.push(conditions::column_before("e.published_at", timestamp));
        self
    }

    pub fn created_after(mut self, timestamp: i64) -> Self {
        self.conditions.push(conditions::column_after("e.created_at", timestamp));
        self
    }

    pub fn changed_after(mut self, timestamp: i64) -> Self {
        self.conditions.push(conditions::column_after("e.changed_at", timestamp));
        self
    }

    /// Append an ordering term. Terms apply in the order they were added.
    pub fn with_sorting(mut self, field: SortField, direction: SortDirection) -> Self {
        self.order.push((field, direction));
        self
    }

    /// Ignored when `limit <= 0`.
    pub fn with_limit(mut self, limit: i64) -> Self {
        if limit > 0 {
            self.limit = Some(limit);
        }
        self
    }

    /// Ignored when `offset <= 0`.
    pub fn with_offset(mut self, offset: i64) -> Self {
        if offset > 0 {
            self.offset = Some(offset);
        }
        self
    }

    // ========================================================================
    // Terminals
    // ========================================================================

    /// Number of matching entries; ordering and paging are ignored.
    pub async fn count_entries(&self) -> Result<i64, DatabaseError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT count(*) ");
        qb.push(ENTRY_FROM);
        qb.push(" WHERE ");
        self.conditions.render(&mut qb);

        qb.build_query_scalar::<i64>()
            .fetch_one(&self.db.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to count entries", e))
    }

    /// Matching entries with their enclosures.
    pub async fn get_entries(&self) -> Result<Vec<Entry>, DatabaseError> {
        let mut qb = self.select(ENTRY_COLUMNS);
        let rows: Vec<EntryDbRow> = qb
            .build_query_as()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to fetch entries", e))?;

        let mut entries = rows
            .into_iter()
            .map(EntryDbRow::into_entry)
            .collect::<Result<Vec<_>, _>>()?;
        self.db.attach_enclosures(&mut entries).await?;
        Ok(entries)
    }

    /// First matching entry, or `None`.
    pub async fn get_entry(&self) -> Result<Option<Entry>, DatabaseError> {
        let mut first = self.clone();
        first.limit = Some(1);
        Ok(first.get_entries().await?.into_iter().next())
    }

    pub async fn get_entry_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let mut qb = self.select("e.id");
        qb.build_query_scalar::<i64>()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to fetch entry ids", e))
    }

    fn select(&self, columns: &str) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(format!("SELECT {columns} {ENTRY_FROM} WHERE "));
        self.conditions.render(&mut qb);

        if !self.order.is_empty() {
            qb.push(" ORDER BY ");
            for (i, (field, direction)) in self.order.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(field.column());
                qb.push(" ");
                qb.push(direction.keyword());
            }
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                qb.push(" LIMIT ");
                qb.push_bind(limit);
                if let Some(offset) = offset {
                    qb.push(" OFFSET ");
                    qb.push_bind(offset);
                }
            }
            // SQLite only accepts OFFSET after a LIMIT
            (None, Some(offset)) => {
                qb.push(" LIMIT -1 OFFSET ");
                qb.push_bind(offset);
            }
            (None, None) => {}
        }
        qb
    }
}
