//! Feed entry synchronization and query engine for a multi-user feed reader.
//!
//! [`storage::Database`] reconciles freshly fetched feed items with stored
//! entries, reaps stale ones in the background, and serves the filtered and
//! paginated entry views the rest of an application reads from.

pub mod clock;
pub mod config;
pub mod storage;
pub mod tasks;
pub mod util;
