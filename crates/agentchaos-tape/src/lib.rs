//! Record & replay tapes (VCR pattern)
//!
//! Records HTTP interactions as encrypted tapes keyed by deterministic
//! request fingerprints, so flaky agent failures can be replayed under the
//! exact network conditions that caused them.

pub mod crypto;
pub mod fingerprint;
pub mod masking;
pub mod player;
pub mod recorder;
pub mod tape;

pub use crypto::TapeCipher;
pub use fingerprint::{create_fingerprint, normalize_request, RequestFingerprint};
pub use player::TapePlayer;
pub use recorder::TapeRecorder;
pub use tape::{ChaosContext, ResponseSnapshot, Tape, TapeEntry, TAPE_VERSION};
