//! Authenticated encryption for tape files
//!
//! Tapes are persisted as `nonce || AES-256-GCM ciphertext`. The key is
//! either 32 raw bytes or the 44-character URL-safe base64 encoding of 32
//! bytes. A missing key is a hard startup failure in record/replay modes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use agentchaos_core::ChaosError;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::Rng;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for tape payloads.
#[derive(Clone)]
pub struct TapeCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TapeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeCipher").field("key", &"<redacted>").finish()
    }
}

impl TapeCipher {
    /// Build a cipher from the configured key string.
    pub fn new(key: &str) -> Result<Self, ChaosError> {
        let key_bytes = if key.len() == 44 {
            URL_SAFE
                .decode(key)
                .map_err(|e| ChaosError::Tape(format!("Invalid CHAOS_TAPE_KEY: {e}")))?
        } else {
            key.as_bytes().to_vec()
        };

        let key: [u8; 32] = key_bytes.try_into().map_err(|_| {
            ChaosError::Tape(
                "Invalid CHAOS_TAPE_KEY: expected 32 raw bytes or 44-char URL-safe base64".into(),
            )
        })?;
        Ok(Self { key })
    }

    /// Cipher from `CHAOS_TAPE_KEY`; fails with the key-required error when
    /// unset.
    pub fn from_env() -> Result<Self, ChaosError> {
        match std::env::var("CHAOS_TAPE_KEY") {
            Ok(key) if !key.is_empty() => Self::new(&key),
            _ => Err(ChaosError::TapeKeyRequired),
        }
    }

    /// Cipher from an optional configured key.
    pub fn from_key(key: Option<&str>) -> Result<Self, ChaosError> {
        match key {
            Some(key) if !key.is_empty() => Self::new(key),
            _ => Err(ChaosError::TapeKeyRequired),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChaosError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ChaosError::Tape("Tape encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, ChaosError> {
        if blob.len() <= NONCE_LEN {
            return Err(ChaosError::Tape("Tape file truncated".into()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| ChaosError::Tape("Failed to decrypt tape: invalid key or corrupted tape".into()))
    }
}
