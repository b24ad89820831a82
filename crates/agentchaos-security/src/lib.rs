//! Security utilities for the chaos proxy
//!
//! PII redaction, authentication of chaos control traffic, and the
//! append-only audit trail. These keep sensitive values out of logs, spans,
//! and tapes, and make sure only authorized callers can steer chaos
//! injection.

pub mod audit;
pub mod auth;
pub mod redactor;

pub use audit::{AuditAction, AuditLog};
pub use auth::{AuthConfig, AuthContext, ChaosAuth, Scope};
pub use redactor::PiiRedactor;
