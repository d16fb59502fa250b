//! Deterministic cache keys.
//!
//! Both keys are hex SHA-256 digests. Queries are normalized (trimmed, lowercased,
//! internal whitespace collapsed) so trivially different spellings share entries.

use sha2::{Digest, Sha256};

use crate::types::{Document, Filters, StageToggles};

const SHORT_HASH_LEN: usize = 16;

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Trim, lowercase and collapse whitespace runs to single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First 16 hex characters of the content digest.
pub fn short_content_hash(content: &str) -> String {
    let mut hex = sha256_hex(content);
    hex.truncate(SHORT_HASH_LEN);
    hex
}

/// Key for a whole retrieval result. `top_k` is the caller's override, if any.
///
/// Filters and stage overrides are serialized with sorted keys, so map order in
/// the request never changes the key.
pub fn result_cache_key(
    query: &str,
    top_k: Option<usize>,
    filters: Option<&Filters>,
    toggles: Option<&StageToggles>,
) -> String {
    let filters = filters
        .and_then(|f| serde_json::to_string(f).ok())
        .unwrap_or_else(|| "{}".to_string());
    let toggles = toggles
        .and_then(|t| serde_json::to_string(t).ok())
        .unwrap_or_else(|| "{}".to_string());

    let material = [
        "retrieve".to_string(),
        normalize_query(query),
        top_k.map(|k| k.to_string()).unwrap_or_default(),
        filters,
        toggles,
    ]
    .join(":");
    sha256_hex(&material)
}

/// Key for the re-rank scores of a candidate set.
///
/// Documents are identified by id plus a short hash of their content and sorted
/// by id, so the same candidates in any order hit the same entry while edited
/// content misses.
pub fn rerank_cache_key(query: &str, documents: &[Document]) -> String {
    let mut signatures: Vec<(&str, String)> = documents
        .iter()
        .map(|d| (d.id.as_str(), short_content_hash(&d.content)))
        .collect();
    signatures.sort();

    let joined = signatures
        .iter()
        .map(|(id, hash)| format!("{id}:{hash}"))
        .collect::<Vec<_>>()
        .join("|");
    sha256_hex(&format!("rerank:{}:{joined}", normalize_query(query)))
}
