//! Append-only audit trail
//!
//! Records authentication decisions and configuration/state changes, one
//! plain-text line per entry. Write failures never break request handling:
//! they are logged at ERROR and swallowed.

use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

/// Audited action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// An authentication decision
    Auth,
    /// Plan/configuration was (re)loaded
    ConfigChange,
    /// A strategy was enabled or disabled
    StateChange,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Auth => "AUTH",
            AuditAction::ConfigChange => "CONFIG_CHANGE",
            AuditAction::StateChange => "STATE_CHANGE",
        };
        f.write_str(s)
    }
}

/// Append-only audit log file.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AuditLog {
    /// Open (or create) the audit log at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path);
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    /// Audit log path from `CHAOS_AUDIT_LOG`, defaulting to `logs/audit.log`.
    pub fn from_env() -> Self {
        let path = std::env::var("CHAOS_AUDIT_LOG").unwrap_or_else(|_| "logs/audit.log".to_owned());
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one audit entry:
    /// `[AUDIT] <ts>Z | User=<id> | Action=<kind> | Resource=<r> | Outcome=<o> [| Details=<map>]`
    pub fn log(
        &self,
        user_id: &str,
        action: AuditAction,
        resource: &str,
        outcome: &str,
        details: Option<&serde_json::Value>,
    ) {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let mut line = format!(
            "[AUDIT] {timestamp} | User={user_id} | Action={action} | Resource={resource} | Outcome={outcome}"
        );
        if let Some(details) = details {
            line.push_str(&format!(" | Details={details}"));
        }
        line.push('\n');

        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = open_append(&self.path);
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.flush()) {
                error!("Failed to write audit entry to {:?}: {e}", self.path);
            }
        } else {
            error!("Audit log {:?} is not writable; entry dropped", self.path);
        }
    }
}

fn open_append(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Failed to create audit log directory {parent:?}: {e}");
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            error!("Failed to open audit log {path:?}: {e}");
            None
        }
    }
}
