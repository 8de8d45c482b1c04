//! Cache key derivation for fetched responses
//!
//! Keys look like `fetch:GET:https://host/path`, followed by
//! `#<sha256>` when a body or response-affecting headers are present. Header
//! names are lowercased and sorted, so equivalent requests share a key.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Headers that never change the response body
const IGNORED_HEADERS: &[&str] = &[
    "cache-control",
    "if-modified-since",
    "if-none-match",
    "pragma",
    "user-agent",
];

#[derive(Serialize)]
struct CanonicalOptions<'a> {
    body: Option<&'a str>,
    headers: BTreeMap<String, &'a str>,
}

/// Derives the cache key for a request
pub fn cache_key(
    method: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: Option<&str>,
) -> String {
    let method = method.to_ascii_uppercase();
    let headers: BTreeMap<String, &str> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .filter(|(name, _)| !IGNORED_HEADERS.contains(&name.as_str()))
        .collect();

    if headers.is_empty() && body.is_none() {
        return format!("fetch:{method}:{url}");
    }

    let canonical = CanonicalOptions { body, headers };
    // Serializing a struct of strings and a string map cannot fail
    let json = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&json);
    format!("fetch:{method}:{url}#{}", hex::encode(digest))
}
