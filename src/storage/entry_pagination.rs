use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::conditions::{self, Conditions};
use super::entry_query::{SortDirection, ENTRY_FROM};
use super::schema::Database;
use super::types::{DatabaseError, EntrySibling, EntryStatus};

/// Column the reading list is ordered by while navigating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaginationOrder {
    #[default]
    PublishedAt,
    CreatedAt,
    ChangedAt,
}

impl PaginationOrder {
    fn column(self) -> &'static str {
        match self {
            PaginationOrder::PublishedAt => "published_at",
            PaginationOrder::CreatedAt => "created_at",
            PaginationOrder::ChangedAt => "changed_at",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Neighbour {
    Previous,
    Next,
}

/// Finds the entries adjacent to an anchor in a filtered, ordered list.
///
/// "Previous" and "next" are defined for an ascending list. With
/// [`SortDirection::Desc`] the pair is swapped on return so callers always
/// get neighbours as they appear on screen.
#[derive(Clone)]
pub struct EntryPaginationBuilder {
    db: Database,
    conditions: Conditions,
    user_id: i64,
    entry_id: i64,
    order: PaginationOrder,
    direction: SortDirection,
}

impl Database {
    pub fn new_entry_pagination_builder(
        &self,
        user_id: i64,
        entry_id: i64,
        order: PaginationOrder,
        direction: SortDirection,
    ) -> EntryPaginationBuilder {
        let mut conditions = Conditions::default();
        conditions.push(conditions::user_id_eq(user_id));
        conditions.push(conditions::status_ne(EntryStatus::Removed));
        EntryPaginationBuilder {
            db: self.clone(),
            conditions,
            user_id,
            entry_id,
            order,
            direction,
        }
    }
}

impl EntryPaginationBuilder {
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.conditions.push(conditions::status_eq(status));
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

    pub fn with_tags<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        for tag in tags {
            self.conditions.push(conditions::has_tag(tag.as_ref()));
        }
        self
    }

    pub fn with_search_query(mut self, query: &str) -> Self {
        if !query.is_empty() {
            self.conditions.push(conditions::search(query));
        }
        self
    }

    pub fn with_globally_visible(mut self) -> Self {
        self.conditions.push(conditions::globally_visible());
        self
    }

    /// Previous and next siblings of the anchor entry.
    ///
    /// Both lookups run in one transaction against a single resolution of
    /// the anchor's ordering value. A missing anchor yields `(None, None)`.
    pub async fn entries(
        &self,
    ) -> Result<(Option<EntrySibling>, Option<EntrySibling>), DatabaseError> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::begin("entry pagination", e))?;

        let (prev, next) = match self.siblings(&mut tx).await {
            Ok(pair) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::commit("entry pagination", e))?;
                pair
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    return Err(DatabaseError::rollback_failed(rollback, err));
                }
                return Err(err);
            }
        };

        match self.direction {
            SortDirection::Asc => Ok((prev, next)),
            SortDirection::Desc => Ok((next, prev)),
        }
    }

    async fn siblings(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<(Option<EntrySibling>, Option<EntrySibling>), DatabaseError> {
        let mut anchor_query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        anchor_query.push(self.order.column());
        anchor_query.push(" FROM entries WHERE id = ");
        anchor_query.push_bind(self.entry_id);
        anchor_query.push(" AND user_id = ");
        anchor_query.push_bind(self.user_id);

        let anchor: Option<i64> = anchor_query
            .build_query_scalar()
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                DatabaseError::query(
                    format!("unable to resolve pagination anchor #{}", self.entry_id),
                    e,
                )
            })?;

        let Some(value) = anchor else {
            return Ok((None, None));
        };

        let prev = self.neighbour(conn, Neighbour::Previous, value).await?;
        let next = self.neighbour(conn, Neighbour::Next, value).await?;
        Ok((prev, next))
    }

    async fn neighbour(
        &self,
        conn: &mut SqliteConnection,
        which: Neighbour,
        value: i64,
    ) -> Result<Option<EntrySibling>, DatabaseError> {
        let column = self.order.column();
        let (cmp, id_cmp, order_by) = match which {
            Neighbour::Previous => ("<", ">", "DESC, e.created_at DESC, e.id ASC"),
            Neighbour::Next => (">", "<", "ASC, e.created_at ASC, e.id DESC"),
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT e.id, e.title ");
        qb.push(ENTRY_FROM);
        qb.push(" WHERE ");
        self.conditions.render(&mut qb);
        qb.push(format!(" AND (e.{column} {cmp} "));
        qb.push_bind(value);
        qb.push(format!(" OR (e.{column} = "));
        qb.push_bind(value);
        qb.push(format!(" AND e.id {id_cmp} "));
        qb.push_bind(self.entry_id);
        qb.push(format!(")) ORDER BY e.{column} {order_by} LIMIT 1"));

        let row: Option<(i64, String)> = qb
            .build_query_as()
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| DatabaseError::query("unable to fetch sibling entry", e))?;
        Ok(row.map(|(id, title)| EntrySibling { id, title }))
    }
}
