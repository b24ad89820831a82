//! Deterministic request fingerprinting
//!
//! A fingerprint identifies a request by (method, normalized URL, body hash,
//! headers hash). Normalization makes the fingerprint stable under query
//! parameter reordering, JSON key reordering, and the volatile fields named
//! by the plan's replay config.

use crate::masking::{apply_ignore_paths, MaskScope};
use agentchaos_config::ReplayConfig;
use agentchaos_core::ChaosError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::form_urlencoded;
use url::Url;

/// Headers that participate in the fingerprint.
const HEADER_ALLOWLIST: &[&str] = &["content-type"];

/// Fingerprint for matching requests during replay.
///
/// Equality is by value over the full 4-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    /// HTTP method, uppercased
    pub method: String,
    /// Normalized request URL
    pub url: String,
    /// SHA-256 of the normalized body, absent for empty bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_hash: Option<String>,
    /// SHA-256 of the allowlisted headers, absent when none survive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_hash: Option<String>,
}

/// Request components after normalization, ready for hashing.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub method: String,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
}

/// Normalize request components for deterministic fingerprinting.
///
/// - Method: uppercased
/// - URL: query params filtered by `ignore_params`, then sorted
/// - Body: JSON bodies are parsed, masked by `ignore_paths`, and re-dumped
///   with sorted keys
/// - Headers: reduced to the allowlist, then masked by `$.headers.*` paths
pub fn normalize_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    headers: &BTreeMap<String, String>,
    replay: &ReplayConfig,
    strict: bool,
) -> Result<NormalizedRequest, ChaosError> {
    let normalized_method = method.to_ascii_uppercase();
    let normalized_url = normalize_url(url, &replay.ignore_params);

    let mut normalized_headers = BTreeMap::new();
    for (key, value) in headers {
        let key_lower = key.to_ascii_lowercase();
        if HEADER_ALLOWLIST.contains(&key_lower.as_str()) {
            normalized_headers.insert(key_lower, value.clone());
        }
    }

    let content_type = normalized_headers.get("content-type").cloned().unwrap_or_default();
    let normalized_body = match body {
        Some(bytes) if !bytes.is_empty() => {
            if content_type.to_ascii_lowercase().contains("json") {
                normalize_json_body(bytes, replay, strict)?.or_else(|| Some(bytes.to_vec()))
            } else {
                Some(bytes.to_vec())
            }
        }
        _ => None,
    };

    // Mask volatile headers before hashing.
    let mut headers_value = serde_json::to_value(&normalized_headers)?;
    apply_ignore_paths(&mut headers_value, &replay.ignore_paths, MaskScope::Headers, strict)?;
    let masked_headers: BTreeMap<String, String> =
        serde_json::from_value(headers_value).unwrap_or(normalized_headers);

    Ok(NormalizedRequest {
        method: normalized_method,
        url: normalized_url,
        body: normalized_body,
        headers: masked_headers,
    })
}

fn normalize_url(url: &str, ignore_params: &[String]) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_owned();
    };

    let ignore_lower: Vec<String> = ignore_params.iter().map(|p| p.to_ascii_lowercase()).collect();
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !ignore_lower.contains(&k.to_ascii_lowercase()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut rebuilt = parsed;
    if pairs.is_empty() {
        rebuilt.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&pairs)
            .finish();
        rebuilt.set_query(Some(&query));
    }
    rebuilt.to_string()
}

/// Parse, mask, and canonically re-serialize a JSON body.
///
/// Returns `None` when the body is not parseable JSON (callers keep the raw
/// bytes in that case). Key ordering is canonical because `serde_json` maps
/// are BTree-backed by default.
fn normalize_json_body(
    bytes: &[u8],
    replay: &ReplayConfig,
    strict: bool,
) -> Result<Option<Vec<u8>>, ChaosError> {
    let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return Ok(None);
    };
    apply_ignore_paths(&mut value, &replay.ignore_paths, MaskScope::Body, strict)?;
    Ok(Some(value.to_string().into_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash the normalized body, `None` for empty bodies.
pub fn compute_body_hash(body: Option<&[u8]>) -> Option<String> {
    match body {
        Some(bytes) if !bytes.is_empty() => Some(sha256_hex(bytes)),
        _ => None,
    }
}

/// Hash the sorted, JSON-serialized header list, `None` for an empty map.
pub fn compute_headers_hash(headers: &BTreeMap<String, String>) -> Option<String> {
    if headers.is_empty() {
        return None;
    }
    let sorted: Vec<(&String, &String)> = headers.iter().collect();
    let serialized = serde_json::to_string(&sorted).unwrap_or_default();
    Some(sha256_hex(serialized.as_bytes()))
}

/// Build a fingerprint from raw request components.
pub fn create_fingerprint(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    headers: &BTreeMap<String, String>,
    replay: &ReplayConfig,
    strict: bool,
) -> Result<RequestFingerprint, ChaosError> {
    let normalized = normalize_request(method, url, body, headers, replay, strict)?;
    Ok(RequestFingerprint {
        method: normalized.method,
        url: normalized.url,
        body_hash: compute_body_hash(normalized.body.as_deref()),
        headers_hash: compute_headers_hash(&normalized.headers),
    })
}
