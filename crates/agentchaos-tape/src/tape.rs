//! Tape document model and encrypted persistence

use crate::crypto::TapeCipher;
use crate::fingerprint::RequestFingerprint;
use agentchaos_core::ChaosError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Tape format version.
pub const TAPE_VERSION: &str = "1.0";

/// Snapshot of an HTTP response, sufficient to reconstruct it byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    /// Body bytes, hex-encoded on disk
    #[serde(with = "hex_bytes")]
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Chaos that was active while an entry was recorded, preserved so replay is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosContext {
    #[serde(default)]
    pub applied_strategies: Vec<String>,
    #[serde(default)]
    pub chaos_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
}

fn default_redacted() -> bool {
    true
}

/// One recorded request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeEntry {
    pub fingerprint: RequestFingerprint,
    pub response: ResponseSnapshot,
    pub chaos_context: ChaosContext,
    /// ISO-8601 recording time
    pub timestamp: String,
    /// Monotonic position in the tape
    pub sequence: u64,
    #[serde(default = "default_redacted")]
    pub redacted: bool,
    /// Redacted request body (text only), kept for replay-mismatch diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_redacted: Option<String>,
}

/// A complete session recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tape {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub entries: Vec<TapeEntry>,
}

fn default_version() -> String {
    TAPE_VERSION.to_owned()
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    pub fn new() -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "created_at".to_owned(),
            serde_json::Value::String(chrono::Local::now().to_rfc3339()),
        );
        metadata.insert(
            "recorder_version".to_owned(),
            serde_json::Value::String(TAPE_VERSION.to_owned()),
        );
        Self {
            version: TAPE_VERSION.to_owned(),
            metadata,
            entries: Vec::new(),
        }
    }

    /// Serialize, encrypt, and atomically write the tape.
    pub fn save(&self, path: impl AsRef<Path>, cipher: &TapeCipher) -> Result<(), ChaosError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let payload = serde_json::to_vec(self)?;
        let encrypted = cipher.encrypt(&payload)?;

        // Atomic replace: write a sibling temp file, then rename over.
        let tmp_path = path.with_extension("tape.tmp");
        std::fs::write(&tmp_path, &encrypted)?;
        std::fs::rename(&tmp_path, path)?;

        info!("Tape saved to {} ({} entries)", path.display(), self.entries.len());
        Ok(())
    }

    /// Load and decrypt a tape.
    pub fn load(path: impl AsRef<Path>, cipher: &TapeCipher) -> Result<Tape, ChaosError> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let payload = cipher.decrypt(&raw)?;
        let tape: Tape = serde_json::from_slice(&payload)?;
        info!("Tape loaded from {} ({} entries)", path.display(), tape.entries.len());
        Ok(tape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TapeCipher {
        TapeCipher::new("0123456789abcdef0123456789abcdef").unwrap()
    }

    fn sample_entry() -> TapeEntry {
        TapeEntry {
            fingerprint: RequestFingerprint {
                method: "POST".into(),
                url: "http://h/api".into(),
                body_hash: Some("abc".into()),
                headers_hash: None,
            },
            response: ResponseSnapshot {
                status_code: 200,
                reason: "OK".into(),
                headers: BTreeMap::from([("content-type".to_owned(), "application/json".to_owned())]),
                content: br#"{"ok":true}"#.to_vec(),
                content_encoding: Some("gzip".into()),
            },
            chaos_context: ChaosContext {
                applied_strategies: vec!["delay".into()],
                chaos_applied: true,
                traffic_type: Some("TOOL_CALL".into()),
                ..Default::default()
            },
            timestamp: "2025-03-01T10:00:00".into(),
            sequence: 0,
            redacted: true,
            request_body_redacted: Some(r#"{"a":1}"#.into()),
        }
    }

    #[test]
    fn test_new_tape_metadata() {
        let tape = Tape::new();
        assert_eq!(tape.version, "1.0");
        assert!(tape.metadata.contains_key("created_at"));
        assert_eq!(tape.metadata["recorder_version"], "1.0");
    }

    #[test]
    fn test_snapshot_content_is_hex_on_disk() {
        let entry = sample_entry();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json["response"]["content"].as_str().unwrap(),
            hex::encode(br#"{"ok":true}"#)
        );
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.tape");

        let mut tape = Tape::new();
        tape.entries.push(sample_entry());
        tape.save(&path, &cipher()).unwrap();

        // On-disk form is ciphertext, not JSON
        let raw = std::fs::read(&path).unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());

        let loaded = Tape::load(&path, &cipher()).unwrap();
        assert_eq!(loaded.version, "1.0");
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].response, tape.entries[0].response);
        assert_eq!(loaded.entries[0].response.content_encoding.as_deref(), Some("gzip"));
    }

    #[test]
    fn test_load_with_wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.tape");
        Tape::new().save(&path, &cipher()).unwrap();

        let wrong = TapeCipher::new("ffffffffffffffffffffffffffffffff").unwrap();
        assert!(Tape::load(&path, &wrong).is_err());
    }
}
