//! Tape player
//!
//! Looks up recorded responses by exact fingerprint. On a miss, a partial
//! match on (method, URL) produces a diagnostic diff of the recorded vs live
//! request bodies so drift is debuggable; fingerprint equality itself stays
//! strict.

use crate::crypto::TapeCipher;
use crate::fingerprint::{compute_body_hash, normalize_request};
use crate::recorder::redact_body_bytes;
use crate::tape::{Tape, TapeEntry};
use agentchaos_config::ReplayConfig;
use agentchaos_core::{ChaosError, ErrorCode};
use agentchaos_observability::record_error_code;
use agentchaos_security::PiiRedactor;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fingerprint::RequestFingerprint;

/// Plays back recorded HTTP interactions from a tape.
pub struct TapePlayer {
    tape: Tape,
    tape_path: PathBuf,
    index: HashMap<RequestFingerprint, usize>,
    redactor: PiiRedactor,
    replay: ReplayConfig,
    replay_strict: bool,
}

impl TapePlayer {
    /// Load a tape and build the fingerprint index. A missing or undecryptable
    /// tape is fatal to playback startup.
    pub fn load(
        tape_path: impl AsRef<Path>,
        cipher: &TapeCipher,
        redactor: PiiRedactor,
        replay: ReplayConfig,
        replay_strict: bool,
    ) -> Result<Self, ChaosError> {
        let tape_path = tape_path.as_ref().to_path_buf();
        let tape = Tape::load(&tape_path, cipher)?;

        let mut index = HashMap::new();
        for (position, entry) in tape.entries.iter().enumerate() {
            index.insert(entry.fingerprint.clone(), position);
        }

        info!(
            "TapePlayer initialized: {} ({} entries, {} unique fingerprints)",
            tape_path.display(),
            tape.entries.len(),
            index.len()
        );

        Ok(Self {
            tape,
            tape_path,
            index,
            redactor,
            replay,
            replay_strict,
        })
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn tape_path(&self) -> &Path {
        &self.tape_path
    }

    /// Find the recorded entry for a live request.
    ///
    /// Exact fingerprint match first; then a partial (method + URL) match
    /// with a DEBUG diagnostic; `None` only when no method+URL pair exists.
    pub fn find_match(
        &self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: &BTreeMap<String, String>,
    ) -> Option<&TapeEntry> {
        let normalized =
            normalize_request(method, url, body, headers, &self.replay, self.replay_strict).ok()?;
        let fingerprint = RequestFingerprint {
            method: normalized.method.clone(),
            url: normalized.url.clone(),
            body_hash: compute_body_hash(normalized.body.as_deref()),
            headers_hash: crate::fingerprint::compute_headers_hash(&normalized.headers),
        };

        if let Some(&position) = self.index.get(&fingerprint) {
            let entry = &self.tape.entries[position];
            debug!("Found exact match for {method} {url} (sequence {})", entry.sequence);
            return Some(entry);
        }

        // Partial match: same method and URL, body/headers drifted.
        let live_body_hash = fingerprint.body_hash.as_deref().unwrap_or("none");
        let live_body_text = {
            let redacted =
                redact_body_bytes(normalized.body.as_deref().unwrap_or_default(), headers, &self.redactor);
            if redacted.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&redacted).into_owned())
            }
        };

        for entry in &self.tape.entries {
            if entry.fingerprint.method == normalized.method && entry.fingerprint.url == normalized.url {
                let recorded_hash = entry.fingerprint.body_hash.as_deref().unwrap_or("none");
                let diff = compute_json_diff(
                    entry.request_body_redacted.as_deref(),
                    live_body_text.as_deref(),
                );
                debug!(
                    "Replay mismatch! Recorded body hash: {recorded_hash}, live body hash: {live_body_hash}. Diff: {diff}"
                );
                debug!(
                    "Found partial match for {method} {url} (sequence {}, ignoring body/headers)",
                    entry.sequence
                );
                record_error_code(ErrorCode::TapeMismatch, None);
                return Some(entry);
            }
        }

        warn!("No match found for {method} {url}");
        None
    }
}

/// Key-by-key diff of two JSON documents, for mismatch diagnostics.
fn compute_json_diff(recorded: Option<&str>, live: Option<&str>) -> String {
    let (Some(recorded), Some(live)) = (recorded, live) else {
        return "missing_body".to_owned();
    };
    let (Ok(rec_value), Ok(live_value)) = (
        serde_json::from_str::<serde_json::Value>(recorded),
        serde_json::from_str::<serde_json::Value>(live),
    ) else {
        return "non_json_or_unparseable".to_owned();
    };

    let diffs = diff_values(&rec_value, &live_value, "$");
    if diffs.is_empty() {
        "no_diff".to_owned()
    } else {
        diffs.join("; ")
    }
}

fn diff_values(recorded: &serde_json::Value, live: &serde_json::Value, path: &str) -> Vec<String> {
    use serde_json::Value;
    let mut diffs = Vec::new();

    match (recorded, live) {
        (Value::Object(rec), Value::Object(liv)) => {
            let mut keys: Vec<&String> = rec.keys().chain(liv.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = format!("{path}.{key}");
                match (rec.get(key), liv.get(key)) {
                    (None, Some(_)) => diffs.push(format!("{child}: missing_in_recorded")),
                    (Some(_), None) => diffs.push(format!("{child}: missing_in_live")),
                    (Some(r), Some(l)) => diffs.extend(diff_values(r, l, &child)),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(rec), Value::Array(liv)) => {
            if rec.len() != liv.len() {
                diffs.push(format!("{path}: length {} != {}", rec.len(), liv.len()));
            }
        }
        (rec, liv) => {
            if rec != liv {
                diffs.push(format!("{path}: {rec} != {liv}"));
            }
        }
    }

    diffs
}
