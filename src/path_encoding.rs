//! Path encoding for filesystem-safe, per-stream directory names.
//!
//! URL paths are encoded using base64url (RFC 4648 §5) so they're safe as a
//! directory component. Paths whose encoding would exceed 200 characters are
//! truncated and disambiguated with a hash suffix instead, trading
//! reversibility for filesystem-length safety on long paths. The mapping is
//! deterministic so a restart's KV scan can re-derive the same directory
//! name for a given stream path.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

const MAX_PATH_LENGTH: usize = 200;
const TRUNCATE_LENGTH: usize = 180;
const HASH_PREFIX_LENGTH: usize = 16;

/// Directory name for a stream's segment files, derived from its path.
pub fn encode_path(path: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(path.as_bytes());

    if encoded.len() > MAX_PATH_LENGTH {
        let hash = compute_hash(path);
        let truncated = &encoded[..TRUNCATE_LENGTH];
        format!("{}~{}", truncated, &hash[..HASH_PREFIX_LENGTH])
    } else {
        encoded
    }
}

/// Decode a directory name back to its stream path. Truncated (hashed)
/// names cannot be reversed and return `None`.
pub fn decode_path(encoded: &str) -> Option<String> {
    if encoded.contains('~') {
        return None;
    }

    URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
