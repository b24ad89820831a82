//! Replay masking via JSONPath
//!
//! Volatile fields (`$.timestamp`, `$.headers.Date`, ...) are masked to the
//! literal `<IGNORED>` before hashing so fingerprints stay stable across
//! runs. Paths that the engine cannot evaluate fail hard in strict mode;
//! outside strict mode a reduced dot-path fallback applies.

use agentchaos_core::ChaosError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Replacement value for masked fields.
pub const IGNORED: &str = "<IGNORED>";

/// Which document a set of ignore paths is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskScope {
    /// Request body; `$.body.` prefixes are stripped, `$.headers.` skipped
    Body,
    /// Normalized header map; only `$.headers.` paths apply
    Headers,
}

static FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);

/// Mask all matching fields in `value` in place.
pub fn apply_ignore_paths(
    value: &mut Value,
    ignore_paths: &[String],
    scope: MaskScope,
    strict: bool,
) -> Result<(), ChaosError> {
    if ignore_paths.is_empty() {
        return Ok(());
    }

    for raw_path in ignore_paths {
        let rewritten = match scope {
            MaskScope::Headers => {
                let Some(rest) = raw_path.strip_prefix("$.headers.") else {
                    continue;
                };
                format!("$.{rest}")
            }
            MaskScope::Body => {
                if raw_path.starts_with("$.headers.") {
                    continue;
                }
                match raw_path.strip_prefix("$.body.") {
                    Some(rest) => format!("$.{rest}"),
                    None => raw_path.clone(),
                }
            }
        };

        // The engine consumes the document, so it only replaces the original
        // on success; an evaluation failure leaves the document intact for
        // the fallback.
        match jsonpath_lib::replace_with(value.clone(), &rewritten, &mut |_| {
            Some(Value::String(IGNORED.to_owned()))
        }) {
            Ok(masked) => *value = masked,
            Err(e) if strict => {
                return Err(ChaosError::ConfigInvalid(format!(
                    "Replay ignore path '{raw_path}' failed to evaluate: {e:?}"
                )));
            }
            Err(e) => {
                debug!("Ignore path '{raw_path}' unevaluable ({e:?}); using dot-path fallback");
                apply_dot_path_fallback(value, &rewritten);
                if !FALLBACK_WARNED.swap(true, Ordering::Relaxed) {
                    warn!("Applying limited dot-path fallback for replay ignore paths");
                }
            }
        }
    }

    Ok(())
}

/// Best-effort masking for simple `$.a.b` paths only.
fn apply_dot_path_fallback(value: &mut Value, path: &str) {
    let parts: Vec<&str> = path
        .split('.')
        .filter(|p| !p.is_empty() && *p != "$")
        .collect();
    if parts.is_empty() || parts.iter().any(|p| p.contains('[') || *p == "*") {
        return;
    }

    let mut current = value;
    for key in &parts[..parts.len() - 1] {
        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
    if let Some(obj) = current.as_object_mut() {
        if let Some(last) = parts.last() {
            if let Some(slot) = obj.get_mut(*last) {
                *slot = Value::String(IGNORED.to_owned());
            }
        }
    }
}
