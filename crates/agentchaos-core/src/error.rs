//! Error taxonomy for the chaos proxy
//!
//! Two layers: `ChaosError` is the library error type propagated through
//! `Result`, while `ErrorCode` is the stable string taxonomy surfaced through
//! metrics and structured logs.

use std::fmt;
use thiserror::Error;

/// Stable error codes emitted via the `chaos_error_codes_total` counter and
/// bracketed in log lines (e.g. `[STRATEGY_DISABLED]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Strict classifier mode requires rule packs; classification returned UNKNOWN
    ClassifierStrictMissingRules,
    /// Configured JSONPath matched nothing in the response
    InvalidJsonPath,
    /// Strategy raised while transforming a request/response body
    MutationFailed,
    /// Circuit breaker tripped; strategy bypassed for the reset timeout
    StrategyDisabled,
    /// Tape encryption key missing for record/replay
    TapeKeyRequired,
    /// Playback fell back to a partial match
    TapeMismatch,
    /// JWT validation requested but not possible
    JwtUnavailable,
    /// JWT failed signature/claims validation
    JwtInvalid,
    /// Chaos plan failed validation
    ConfigInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ClassifierStrictMissingRules => "CLASSIFIER_STRICT_MISSING_RULES",
            ErrorCode::InvalidJsonPath => "INVALID_JSONPATH",
            ErrorCode::MutationFailed => "MUTATION_FAILED",
            ErrorCode::StrategyDisabled => "STRATEGY_DISABLED",
            ErrorCode::TapeKeyRequired => "TAPE_KEY_REQUIRED",
            ErrorCode::TapeMismatch => "TAPE_MISMATCH",
            ErrorCode::JwtUnavailable => "JWT_UNAVAILABLE",
            ErrorCode::JwtInvalid => "JWT_INVALID",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chaos proxy errors
#[derive(Error, Debug)]
pub enum ChaosError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Tape error: {0}")]
    Tape(String),

    #[error("Tape encryption key required (set CHAOS_TAPE_KEY)")]
    TapeKeyRequired,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Circuit breaker '{0}' is open")]
    CircuitBreakerOpen(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
