//! Plan loading and hot reload
//!
//! Plans are reloaded only when the SHA-256 of the file bytes changes. The
//! current plan is held behind an atomic swap so readers always observe a
//! complete plan, never a partially built one. A failed reload keeps the
//! previous plan active.

use crate::plan::ChaosPlan;
use agentchaos_core::ChaosError;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Load and validate a chaos plan from a YAML file.
pub fn load_plan(path: impl AsRef<Path>) -> Result<ChaosPlan, ChaosError> {
    let path = path.as_ref();
    info!("Loading chaos plan from: {}", path.display());

    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Err(ChaosError::ConfigInvalid(format!(
            "Chaos plan file is empty: {}",
            path.display()
        )));
    }

    let mut plan: ChaosPlan = serde_yaml::from_str(&raw)
        .map_err(|e| ChaosError::ConfigInvalid(format!("Failed to parse {}: {e}", path.display())))?;
    plan.hydrate_classifier_rules();
    plan.validate()?;

    info!(
        "Loaded chaos plan: {} targets, {} scenarios ({} enabled)",
        plan.targets.len(),
        plan.scenarios.len(),
        plan.scenarios.iter().filter(|s| s.enabled).count()
    );
    Ok(plan)
}

/// SHA-256 hex digest of a file's bytes, used for change detection.
pub fn compute_file_hash(path: impl AsRef<Path>) -> Result<String, ChaosError> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}

/// Process-wide holder for the current chaos plan.
pub struct PlanStore {
    current: ArcSwapOption<ChaosPlan>,
    last_hash: Mutex<Option<String>>,
}

impl Default for PlanStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::const_empty(),
            last_hash: Mutex::new(None),
        }
    }

    /// Install a plan, replacing whatever was active.
    pub fn set(&self, plan: ChaosPlan) -> Arc<ChaosPlan> {
        let plan = Arc::new(plan);
        self.current.store(Some(plan.clone()));
        info!(
            "Set chaos plan: {}",
            plan.plan_name().unwrap_or("unnamed")
        );
        plan
    }

    /// Snapshot of the current plan, if any.
    pub fn get(&self) -> Option<Arc<ChaosPlan>> {
        self.current.load_full()
    }

    /// Load a plan from `path` and install it, recording the file hash.
    pub fn load_and_set(&self, path: impl AsRef<Path>) -> Result<Arc<ChaosPlan>, ChaosError> {
        let path = path.as_ref();
        let hash = compute_file_hash(path)?;
        let plan = load_plan(path)?;
        let plan = self.set(plan);
        *self.last_hash.lock() = Some(hash);
        Ok(plan)
    }

    /// Reload the plan when the file content hash changed.
    ///
    /// Returns the new plan when a reload happened; `None` when the hash is
    /// unchanged or the reload failed (the previous plan stays active, the
    /// failure is logged at ERROR).
    pub fn reload_if_changed(&self, path: impl AsRef<Path>) -> Option<Arc<ChaosPlan>> {
        let path = path.as_ref();

        let current_hash = match compute_file_hash(path) {
            Ok(hash) => hash,
            Err(e) => {
                debug!("Chaos plan unreadable ({e}); keeping current plan");
                return None;
            }
        };

        // Double-checked under the lock so concurrent reloaders do the work
        // once.
        let mut last_hash = self.last_hash.lock();
        if last_hash.as_deref() == Some(current_hash.as_str()) {
            return None;
        }

        match load_plan(path) {
            Ok(plan) => {
                let plan = self.set(plan);
                *last_hash = Some(current_hash);
                Some(plan)
            }
            Err(e) => {
                error!("Failed to reload chaos plan {}: {e}", path.display());
                None
            }
        }
    }
}
