//! # Colloquy Utilities
//!
//! Hashing, semantic-key derivation, and id/time helpers shared across
//! the workspace.

use cq_core::types::{ActingIdentity, Realm};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content string
///
/// # Examples
///
/// ```
/// use utils::compute_content_hash;
///
/// let hash = compute_content_hash("hello world");
/// assert_eq!(hash.len(), 64);
/// ```
#[must_use]
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the semantic key identifying one logical fact across realms.
///
/// Two entries with the same key are treated as the same fact during
/// merge (higher-authority realm wins) and during consolidation upsert
/// (resubmission updates rather than duplicates). The key is the SHA-256
/// of the normalized entity name and fact kind, NUL-separated so that
/// ("ab", "c") and ("a", "bc") never collide.
#[must_use]
pub fn semantic_key(entity_name: &str, kind: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(entity_name).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(kind).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Cache key for one merged resolution result: query (normalized,
/// bounded), identity tuple, sorted realm set, and traversal depth.
#[must_use]
pub fn search_cache_key(
    query: &str,
    identity: &ActingIdentity,
    realms: &[Realm],
    max_depth: u8,
) -> String {
    let mut sorted: Vec<&Realm> = realms.iter().collect();
    sorted.sort();
    let realm_part: Vec<String> = sorted.iter().map(|r| r.to_string()).collect();

    let normalized_query: String = normalize(query).chars().take(100).collect();

    let mut hasher = Sha256::new();
    hasher.update(normalized_query.as_bytes());
    hasher.update([0u8]);
    hasher.update(identity.cache_component().as_bytes());
    hasher.update([0u8]);
    hasher.update(realm_part.join(",").as_bytes());
    hasher.update([0u8]);
    hasher.update([max_depth]);
    format!("{:x}", hasher.finalize())
}

/// Generate UUID v4 string
#[must_use]
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time as epoch seconds.
#[must_use]
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
