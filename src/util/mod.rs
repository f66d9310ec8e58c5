//! Small helpers shared by the storage layer and entry producers.
//!
//! - **Hashing**: stable content hashes for the `(feed_id, hash)` dedup key
//! - **Share codes**: random, URL-safe identifiers for publicly shared entries

mod hash;

pub use hash::{content_hash, random_share_code};
