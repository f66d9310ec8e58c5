use sha2::{Digest, Sha256};

/// Number of random bytes behind a share code (hex-encoded to 40 characters).
const SHARE_CODE_BYTES: usize = 20;

/// Compute the stable content hash used to deduplicate entries within a feed.
///
/// Producers hash whatever identifies an item across fetches (GUID when the
/// feed provides one, otherwise the item URL). The result is lowercase hex
/// SHA-256, 64 characters long.
///
/// # Examples
///
/// ```
/// use feedsync::util::content_hash;
///
/// let a = content_hash("https://example.com/post/1");
/// assert_eq!(a.len(), 64);
/// assert_eq!(a, content_hash("https://example.com/post/1"));
/// ```
pub fn content_hash(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

/// Generate a fresh share code for an entry.
pub fn random_share_code() -> String {
    let bytes: [u8; SHARE_CODE_BYTES] = rand::random();
    hex::encode(bytes)
}
