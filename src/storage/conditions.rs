//! Typed predicate accumulator shared by the entry query builders.
//!
//! A predicate is an ordered list of SQL text and bound values. Nothing is
//! rendered until a query runs, at which point every part is pushed into a
//! `sqlx::QueryBuilder` in order. Placeholders therefore come from position in
//! the list and can never drift from the values they belong to.

use std::borrow::Cow;

use sqlx::{QueryBuilder, Sqlite};

use super::types::EntryStatus;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Sql(Cow<'static, str>),
    Bind(SqlValue),
}

/// One AND-able condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Predicate {
    parts: Vec<Part>,
}

impl Predicate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sql(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.parts.push(Part::Sql(text.into()));
        self
    }

    pub(crate) fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.parts.push(Part::Bind(value.into()));
        self
    }

    fn render(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for part in &self.parts {
            match part {
                Part::Sql(text) => {
                    qb.push(text.as_ref());
                }
                Part::Bind(SqlValue::Int(v)) => {
                    qb.push_bind(*v);
                }
                Part::Bind(SqlValue::Text(v)) => {
                    qb.push_bind(v.clone());
                }
            }
        }
    }

    #[cfg(test)]
    fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.parts.iter().filter_map(|p| match p {
            Part::Bind(v) => Some(v),
            Part::Sql(_) => None,
        })
    }
}

/// Ordered set of predicates joined with `AND`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Conditions {
    predicates: Vec<Predicate>,
}

impl Conditions {
    pub(crate) fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Bound values in render order.
    #[cfg(test)]
    pub(crate) fn values(&self) -> Vec<&SqlValue> {
        self.predicates.iter().flat_map(|p| p.values()).collect()
    }

    /// Append `p1 AND p2 AND ...`, or `1 = 1` when there are no predicates.
    pub(crate) fn render(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if self.predicates.is_empty() {
            qb.push("1 = 1");
            return;
        }
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                qb.push(" AND ");
            }
            predicate.render(qb);
        }
    }
}

/// Push `(?, ?, ...)` for `ids`. Callers must reject an empty slice first.
pub(crate) fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    qb.push("(");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

// ============================================================================
// Entry Predicates
// ============================================================================
//
// Column references assume `entries e JOIN feeds f JOIN categories c`.

pub(crate) fn user_id_eq(user_id: i64) -> Predicate {
    Predicate::new().sql("e.user_id = ").bind(user_id)
}

pub(crate) fn status_eq(status: EntryStatus) -> Predicate {
    Predicate::new().sql("e.status = ").bind(status.as_str())
}

pub(crate) fn status_ne(status: EntryStatus) -> Predicate {
    Predicate::new().sql("e.status <> ").bind(status.as_str())
}

pub(crate) fn status_in(statuses: &[EntryStatus]) -> Predicate {
    let mut predicate = Predicate::new().sql("e.status IN (");
    for (i, status) in statuses.iter().enumerate() {
        if i > 0 {
            predicate = predicate.sql(", ");
        }
        predicate = predicate.bind(status.as_str());
    }
    predicate.sql(")")
}

pub(crate) fn feed_id_eq(feed_id: i64) -> Predicate {
    Predicate::new().sql("e.feed_id = ").bind(feed_id)
}

pub(crate) fn category_id_eq(category_id: i64) -> Predicate {
    Predicate::new().sql("f.category_id = ").bind(category_id)
}

pub(crate) fn starred(starred: bool) -> Predicate {
    if starred {
        Predicate::new().sql("e.starred = 1")
    } else {
        Predicate::new().sql("e.starred = 0")
    }
}

/// Loose containment over the serialized JSON array: `"rust"` matches the
/// tag `Rust` but also any tag text that happens to contain `"rust"`.
pub(crate) fn has_tag(tag: &str) -> Predicate {
    Predicate::new()
        .sql("LOWER(e.tags) LIKE ")
        .bind(format!("%\"{}\"%", tag.to_lowercase()))
}

/// ASCII case-insensitive substring match on title or content.
pub(crate) fn search(query: &str) -> Predicate {
    let pattern = format!("%{query}%");
    Predicate::new()
        .sql("(e.title LIKE ")
        .bind(pattern.clone())
        .sql(" OR e.content LIKE ")
        .bind(pattern)
        .sql(")")
}

pub(crate) fn search_case_sensitive(query: &str) -> Predicate {
    Predicate::new()
        .sql("(instr(e.title, ")
        .bind(query)
        .sql(") > 0 OR instr(e.content, ")
        .bind(query)
        .sql(") > 0)")
}

pub(crate) fn globally_visible() -> Predicate {
    Predicate::new().sql("f.hide_globally = 0 AND c.hide_globally = 0")
}

pub(crate) fn entry_id_eq(entry_id: i64) -> Predicate {
    Predicate::new().sql("e.id = ").bind(entry_id)
}

/// `e.id IN (...)`; an empty list matches nothing.
pub(crate) fn entry_id_in(entry_ids: &[i64]) -> Predicate {
    if entry_ids.is_empty() {
        return Predicate::new().sql("1 = 0");
    }
    let mut predicate = Predicate::new().sql("e.id IN (");
    for (i, id) in entry_ids.iter().enumerate() {
        if i > 0 {
            predicate = predicate.sql(", ");
        }
        predicate = predicate.bind(*id);
    }
    predicate.sql(")")
}

pub(crate) fn share_code_eq(share_code: &str) -> Predicate {
    Predicate::new().sql("e.share_code = ").bind(share_code)
}

pub(crate) fn column_after(column: &'static str, timestamp: i64) -> Predicate {
    Predicate::new().sql(column).sql(" > ").bind(timestamp)
}

pub(crate) fn column_before(column: &'static str, timestamp: i64) -> Predicate {
    Predicate::new().sql(column).sql(" < ").bind(timestamp)
}
