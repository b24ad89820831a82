//! Chaos plan schema and validation

use agentchaos_core::ChaosError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// JSONPath expressions masked out of fingerprints by default.
pub const DEFAULT_REPLAY_IGNORE_PATHS: &[&str] = &[
    "$.timestamp",
    "$.created_at",
    "$.date",
    "$.uuid",
    "$.trace_id",
    "$.request_id",
    "$.headers.Date",
    "$.headers.Server",
];

/// What a target pattern applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    HttpEndpoint,
    LlmInput,
    ToolCall,
    AgentRole,
    Custom,
}

/// A chaos target: what should be affected by strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique target identifier
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    /// Regex (URLs, roles) or content pattern to match
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_probability() -> f64 {
    1.0
}

/// A chaos scenario: one fault injection bound to a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario identifier
    pub name: String,
    /// Strategy kind tag, resolved by the strategy factory
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Must resolve to a target name
    pub target_ref: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_probability")]
    pub probability: f64,
    /// Strategy-specific parameters
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Replay masking configuration for deterministic fingerprinting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// JSONPath expressions to mask before hashing
    #[serde(default = "default_ignore_paths")]
    pub ignore_paths: Vec<String>,
    /// Query param names removed before hashing
    #[serde(default)]
    pub ignore_params: Vec<String>,
}

fn default_ignore_paths() -> Vec<String> {
    DEFAULT_REPLAY_IGNORE_PATHS.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            ignore_paths: default_ignore_paths(),
            ignore_params: Vec::new(),
        }
    }
}

/// Traffic classifier rule patterns (case-insensitive regexes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierRules {
    #[serde(default)]
    pub llm_patterns: Vec<String>,
    #[serde(default)]
    pub tool_patterns: Vec<String>,
    #[serde(default)]
    pub agent_patterns: Vec<String>,
}

/// Named classifier rule pack. In strict mode at least one pack is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRulePack {
    pub name: String,
    pub rules: ClassifierRules,
}

/// Complete chaos engineering plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosPlan {
    #[serde(default = "default_version")]
    pub version: String,
    /// Plan revision number (config iteration)
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub replay_config: ReplayConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_rules: Option<ClassifierRules>,
    #[serde(default)]
    pub classifier_rule_packs: Vec<ClassifierRulePack>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

fn default_version() -> String {
    "1.0".to_owned()
}

impl Default for ChaosPlan {
    fn default() -> Self {
        Self {
            version: default_version(),
            revision: 0,
            replay_config: ReplayConfig::default(),
            classifier_rules: None,
            classifier_rule_packs: Vec::new(),
            metadata: serde_json::Map::new(),
            targets: Vec::new(),
            scenarios: Vec::new(),
        }
    }
}

impl ChaosPlan {
    /// Lift `metadata.classifier_rules` into the first-class field when the
    /// plan did not set it directly.
    pub(crate) fn hydrate_classifier_rules(&mut self) {
        if self.classifier_rules.is_none() {
            if let Some(rules) = self.metadata.get("classifier_rules") {
                if let Ok(rules) = serde_json::from_value::<ClassifierRules>(rules.clone()) {
                    self.classifier_rules = Some(rules);
                }
            }
        }
    }

    /// Validate schema invariants; failures abort plan load.
    pub fn validate(&self) -> Result<(), ChaosError> {
        let mut target_names = std::collections::HashSet::new();
        for target in &self.targets {
            if target.pattern.trim().is_empty() {
                return Err(ChaosError::ConfigInvalid(format!(
                    "Target '{}' has an empty pattern",
                    target.name
                )));
            }
            if let Err(e) = Regex::new(&target.pattern) {
                return Err(ChaosError::ConfigInvalid(format!(
                    "Target '{}' pattern does not compile: {e}",
                    target.name
                )));
            }
            if !target_names.insert(target.name.as_str()) {
                return Err(ChaosError::ConfigInvalid(format!(
                    "Duplicate target name '{}'",
                    target.name
                )));
            }
        }

        for scenario in &self.scenarios {
            if !target_names.contains(scenario.target_ref.as_str()) {
                let mut available: Vec<&str> = target_names.iter().copied().collect();
                available.sort_unstable();
                return Err(ChaosError::ConfigInvalid(format!(
                    "Scenario '{}' references unknown target '{}'. Available targets: {:?}",
                    scenario.name, scenario.target_ref, available
                )));
            }
            if !(0.0..=1.0).contains(&scenario.probability) {
                return Err(ChaosError::ConfigInvalid(format!(
                    "Scenario '{}' probability must be between 0.0 and 1.0",
                    scenario.name
                )));
            }
        }

        for pack in &self.classifier_rule_packs {
            validate_rule_set(&pack.rules, &pack.name)?;
        }
        if let Some(rules) = &self.classifier_rules {
            validate_rule_set(rules, "classifier_rules")?;
        }

        Ok(())
    }

    pub fn get_target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Enabled scenarios bound to a given target.
    pub fn scenarios_for_target(&self, target_name: &str) -> Vec<&Scenario> {
        self.scenarios
            .iter()
            .filter(|s| s.target_ref == target_name && s.enabled)
            .collect()
    }

    /// Whether clients may override classification via header.
    pub fn allow_client_override(&self) -> bool {
        self.metadata
            .get("allow_client_override")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn experiment_id(&self) -> String {
        self.metadata
            .get("experiment_id")
            .and_then(|v| v.as_str())
            .unwrap_or("chaos_plan")
            .to_owned()
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(|v| v.as_str())
    }

    /// Flatten enabled scenarios into the legacy strategy-list shape consumed
    /// by the strategy factory. Target metadata is folded into the params so
    /// runtime dispatch keeps role/endpoint context.
    pub fn to_legacy(&self) -> LegacyConfig {
        let mut strategies = Vec::new();
        for scenario in &self.scenarios {
            if !scenario.enabled {
                continue;
            }

            let mut params = scenario.params.clone();
            params.insert(
                "target_ref".to_owned(),
                serde_json::Value::String(scenario.target_ref.clone()),
            );

            if let Some(target) = self.get_target(&scenario.target_ref) {
                let key = match target.target_type {
                    TargetType::HttpEndpoint => Some("url_pattern"),
                    TargetType::AgentRole => Some("target_role"),
                    TargetType::ToolCall => Some("target_endpoint"),
                    TargetType::LlmInput | TargetType::Custom => None,
                };
                if let Some(key) = key {
                    params.insert(key.to_owned(), serde_json::Value::String(target.pattern.clone()));
                }
            }

            strategies.push(StrategySpec {
                name: scenario.name.clone(),
                strategy_type: scenario.strategy_type.clone(),
                enabled: scenario.enabled,
                probability: scenario.probability,
                params,
            });
        }

        LegacyConfig {
            experiment_id: self.experiment_id(),
            strategies,
        }
    }
}

fn validate_rule_set(rules: &ClassifierRules, origin: &str) -> Result<(), ChaosError> {
    for pattern in rules
        .llm_patterns
        .iter()
        .chain(&rules.tool_patterns)
        .chain(&rules.agent_patterns)
    {
        if let Err(e) = Regex::new(pattern) {
            return Err(ChaosError::ConfigInvalid(format!(
                "Classifier pattern '{pattern}' in {origin} does not compile: {e}"
            )));
        }
    }
    Ok(())
}

/// Flattened strategy configuration, the factory's input shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    #[serde(rename = "type")]
    pub strategy_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl StrategySpec {
    /// String param accessor.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Float param accessor (accepts integers too).
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}

/// Legacy projection of a plan: experiment id plus flat strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    pub experiment_id: String,
    pub strategies: Vec<StrategySpec>,
}
