//! Configuration-driven chaos plans
//!
//! A chaos plan is a YAML document of targets (what to attack) and scenarios
//! (how to attack them), plus replay masking and classifier rules. This crate
//! parses, validates, and hot-reloads plans, and carries the environment
//! settings that gate strict behavior.

pub mod loader;
pub mod plan;
pub mod settings;

pub use loader::{compute_file_hash, load_plan, PlanStore};
pub use plan::{
    ChaosPlan, ClassifierRulePack, ClassifierRules, LegacyConfig, ReplayConfig, Scenario,
    StrategySpec, Target, TargetType, DEFAULT_REPLAY_IGNORE_PATHS,
};
pub use settings::Settings;
