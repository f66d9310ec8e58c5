mod categories;
mod cleanup;
mod conditions;
mod enclosures;
mod entries;
mod entry_pagination;
mod entry_query;
mod entry_status;
mod feeds;
mod schema;
#[cfg(test)]
mod test_support;
mod types;
mod users;

pub use entry_pagination::{EntryPaginationBuilder, PaginationOrder};
pub use entry_query::{EntryQueryBuilder, SortDirection, SortField};
pub use schema::{Database, StoreOptions};
pub use types::{
    CandidateEnclosure, CandidateEntry, Category, DatabaseError, Enclosure, Entry, EntryCounts,
    EntrySibling, EntryStatus, Feed, FeedFetchState, NewFeed, TxPhase, User,
};
