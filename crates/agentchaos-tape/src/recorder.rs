//! Tape recorder
//!
//! Fingerprints each request, redacts bodies and headers, and appends entries
//! with a monotonic sequence number. The tape is flushed to disk on shutdown.

use crate::crypto::TapeCipher;
use crate::fingerprint::create_fingerprint;
use crate::tape::{ChaosContext, ResponseSnapshot, Tape, TapeEntry};
use agentchaos_config::ReplayConfig;
use agentchaos_core::ChaosError;
use agentchaos_security::PiiRedactor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TEXT_LIKE_MARKERS: &[&str] = &[
    "application/json",
    "text/",
    "application/xml",
    "application/x-www-form-urlencoded",
];

fn is_text_like(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    TEXT_LIKE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Redact a body when its content type is text-like; binary bodies pass
/// through untouched.
pub(crate) fn redact_body_bytes(
    body: &[u8],
    headers: &BTreeMap<String, String>,
    redactor: &PiiRedactor,
) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }
    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    if !is_text_like(content_type) {
        return body.to_vec();
    }
    let decoded = String::from_utf8_lossy(body);
    redactor.redact(&decoded).into_bytes()
}

/// Records HTTP interactions to a tape.
pub struct TapeRecorder {
    tape: Tape,
    tape_path: PathBuf,
    sequence: u64,
    redactor: PiiRedactor,
    replay: ReplayConfig,
    replay_strict: bool,
}

impl TapeRecorder {
    pub fn new(
        tape_path: impl AsRef<Path>,
        redactor: PiiRedactor,
        replay: ReplayConfig,
        replay_strict: bool,
    ) -> Self {
        let tape_path = tape_path.as_ref().to_path_buf();
        info!("TapeRecorder initialized: {}", tape_path.display());
        Self {
            tape: Tape::new(),
            tape_path,
            sequence: 0,
            redactor,
            replay,
            replay_strict,
        }
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn tape_path(&self) -> &Path {
        &self.tape_path
    }

    /// Record one request/response pair.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: &BTreeMap<String, String>,
        response_status: u16,
        response_reason: &str,
        response_headers: &BTreeMap<String, String>,
        response_content: &[u8],
        response_encoding: Option<&str>,
        chaos_context: ChaosContext,
    ) -> Result<(), ChaosError> {
        let fingerprint =
            create_fingerprint(method, url, body, headers, &self.replay, self.replay_strict)?;

        let redacted_request_body =
            redact_body_bytes(body.unwrap_or_default(), headers, &self.redactor);
        let request_body_text = if redacted_request_body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&redacted_request_body).into_owned())
        };

        let redacted_response_headers = self.redactor.redact_headers(
            response_headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let redacted_response_content =
            redact_body_bytes(response_content, response_headers, &self.redactor);

        let snapshot = ResponseSnapshot {
            status_code: response_status,
            reason: response_reason.to_owned(),
            headers: redacted_response_headers,
            content: redacted_response_content,
            content_encoding: response_encoding.map(str::to_owned),
        };

        let entry = TapeEntry {
            fingerprint,
            response: snapshot,
            chaos_context,
            timestamp: chrono::Local::now().to_rfc3339(),
            sequence: self.sequence,
            redacted: true,
            request_body_redacted: request_body_text,
        };

        self.tape.entries.push(entry);
        self.sequence += 1;

        debug!(
            "Recorded entry {}: {} {} -> {}",
            self.sequence, method, url, response_status
        );
        Ok(())
    }

    /// Encrypt and persist the tape. Fatal to the recording session on error.
    pub fn save(&self, cipher: &TapeCipher) -> Result<&Path, ChaosError> {
        self.tape.save(&self.tape_path, cipher)?;
        Ok(&self.tape_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(dir: &tempfile::TempDir) -> TapeRecorder {
        TapeRecorder::new(
            dir.path().join("session.tape"),
            PiiRedactor::new(true),
            ReplayConfig::default(),
            true,
        )
    }

    fn json_headers() -> BTreeMap<String, String> {
        BTreeMap::from([("Content-Type".to_owned(), "application/json".to_owned())])
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(&dir);
        for _ in 0..3 {
            rec.record(
                "POST",
                "http://h/api",
                Some(br#"{"a":1}"#),
                &json_headers(),
                200,
                "OK",
                &json_headers(),
                br#"{"ok":true}"#,
                None,
                ChaosContext::default(),
            )
            .unwrap();
        }
        let sequences: Vec<u64> = rec.tape().entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_bodies_and_headers_are_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(&dir);
        let mut response_headers = json_headers();
        response_headers.insert("Set-Cookie".to_owned(), "session=abc".to_owned());

        rec.record(
            "POST",
            "http://h/api",
            Some(br#"{"note":"mail alice@example.com"}"#),
            &json_headers(),
            200,
            "OK",
            &response_headers,
            br#"{"key":"sk-proj1234567890abcdef"}"#,
            None,
            ChaosContext::default(),
        )
        .unwrap();

        let entry = &rec.tape().entries[0];
        assert!(entry.redacted);
        assert!(entry
            .request_body_redacted
            .as_deref()
            .unwrap()
            .contains("[REDACTED_EMAIL]"));
        assert_eq!(entry.response.headers["Set-Cookie"], "[REDACTED]");
        let content = String::from_utf8_lossy(&entry.response.content);
        assert!(content.contains("[REDACTED_OPENAI_KEY]"));
    }

    #[test]
    fn test_binary_bodies_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(&dir);
        let headers = BTreeMap::from([("Content-Type".to_owned(), "application/octet-stream".to_owned())]);

        rec.record(
            "POST",
            "http://h/api",
            None,
            &BTreeMap::new(),
            200,
            "OK",
            &headers,
            &[0u8, 159, 146, 150],
            Some("gzip"),
            ChaosContext::default(),
        )
        .unwrap();

        let entry = &rec.tape().entries[0];
        assert_eq!(entry.response.content, vec![0u8, 159, 146, 150]);
        assert_eq!(entry.response.content_encoding.as_deref(), Some("gzip"));
    }

    #[test]
    fn test_save_writes_encrypted_tape() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(&dir);
        rec.record(
            "GET",
            "http://h/x",
            None,
            &BTreeMap::new(),
            200,
            "OK",
            &BTreeMap::new(),
            b"ok",
            None,
            ChaosContext::default(),
        )
        .unwrap();

        let cipher = TapeCipher::new("0123456789abcdef0123456789abcdef").unwrap();
        let path = rec.save(&cipher).unwrap();
        let loaded = Tape::load(path, &cipher).unwrap();
        assert_eq!(loaded.entries.len(), 1);
    }
}
