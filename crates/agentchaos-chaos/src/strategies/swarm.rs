//! Swarm disruption: attacks on inter-agent communication
//!
//! Only fires on AGENT_TO_AGENT traffic. Mutates messages between agents,
//! delays consensus phases, or isolates specific agents entirely.

use crate::strategy::{Strategy, StrategyCommon};
use agentchaos_config::StrategySpec;
use agentchaos_core::{ChaosError, Flow, FlowResponse, TrafficType};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

static AGENT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)agent[-_]?([a-z0-9-]+)").unwrap());

/// Disrupts inter-agent communication in multi-agent swarms.
pub struct SwarmDisruptionStrategy {
    common: StrategyCommon,
    attack_type: String,
    target_subtype: Option<String>,
    mutation_rules: serde_json::Map<String, Value>,
    consensus_delay: f64,
    isolated_agents: Vec<String>,
}

impl SwarmDisruptionStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            attack_type: spec.param_str("attack_type").unwrap_or("message_mutation").to_owned(),
            target_subtype: spec.param_str("target_subtype").map(str::to_owned),
            mutation_rules: spec
                .params
                .get("mutation_rules")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
            consensus_delay: spec.param_f64("consensus_delay").unwrap_or(5.0),
            isolated_agents: spec
                .params
                .get("isolated_agents")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn attack_type(&self) -> &str {
        &self.attack_type
    }

    async fn apply_message_mutation(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        let Some(mut body) = flow.request.json() else {
            return Ok(false);
        };

        let mutated = if self.mutation_rules.is_empty() {
            apply_default_mutations(&mut body)
        } else {
            apply_mutation_rules(&mut body, &self.mutation_rules)
        };

        if mutated {
            flow.request.set_json(&body);
            info!(
                "Swarm disruption '{}' mutated agent message from {}",
                self.name(),
                flow.request.path()
            );
        }
        Ok(mutated)
    }

    async fn apply_consensus_delay(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        let in_consensus = flow.metadata.traffic_subtype.as_deref() == Some("consensus_vote")
            || flow.request.url.to_ascii_lowercase().contains("consensus");
        if !in_consensus {
            return Ok(false);
        }

        info!(
            "Swarm disruption '{}' injecting {}s delay during consensus phase",
            self.name(),
            self.consensus_delay
        );
        tokio::time::sleep(Duration::from_secs_f64(self.consensus_delay)).await;
        Ok(true)
    }

    async fn apply_agent_isolation(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        let Some(agent_id) = extract_agent_id(flow) else {
            return Ok(false);
        };
        if !self.isolated_agents.contains(&agent_id) {
            return Ok(false);
        }

        warn!("Swarm disruption '{}' blocking isolated agent: {agent_id}", self.name());
        flow.response = Some(FlowResponse::make(
            503,
            serde_json::json!({
                "error": "Agent isolated",
                "agent_id": agent_id,
                "message": "This agent has been isolated by chaos engineering",
            })
            .to_string()
            .into_bytes(),
            &[("Content-Type", "application/json")],
        ));
        Ok(true)
    }
}

/// Default mutations: flip booleans, perturb positive numbers by
/// ± max(20%, 1), swap string booleans.
fn apply_default_mutations(value: &mut Value) -> bool {
    let mut mutated = false;
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                match inner {
                    Value::Bool(flag) => {
                        debug!("Flipped boolean {key}");
                        *inner = Value::Bool(!*flag);
                        mutated = true;
                    }
                    Value::Number(n) => {
                        if let Some(num) = n.as_f64() {
                            if num > 0.0 {
                                let change = (num.abs() * 0.2).max(1.0);
                                let sign = if rand::rng().random::<bool>() { 1.0 } else { -1.0 };
                                *inner = serde_json::json!(num + sign * change);
                                mutated = true;
                            }
                        }
                    }
                    Value::String(s) => {
                        let lower = s.to_ascii_lowercase();
                        if lower == "true" || lower == "false" {
                            *inner = Value::String(
                                if lower == "true" { "false" } else { "true" }.to_owned(),
                            );
                            mutated = true;
                        }
                    }
                    Value::Array(_) | Value::Object(_) => {
                        mutated |= apply_default_mutations(inner);
                    }
                    Value::Null => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mutated |= apply_default_mutations(item);
            }
        }
        _ => {}
    }
    mutated
}

/// Custom rule map: matching keys anywhere in the document take the rule's
/// value.
fn apply_mutation_rules(value: &mut Value, rules: &serde_json::Map<String, Value>) -> bool {
    let mut mutated = false;
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if let Some(replacement) = rules.get(key) {
                    if replacement.is_object() && inner.is_object() {
                        if let Some(nested) = replacement.as_object() {
                            mutated |= apply_mutation_rules(inner, nested);
                        }
                    } else {
                        *inner = replacement.clone();
                        mutated = true;
                    }
                } else if inner.is_object() || inner.is_array() {
                    mutated |= apply_mutation_rules(inner, rules);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mutated |= apply_mutation_rules(item, rules);
            }
        }
        _ => {}
    }
    mutated
}

fn extract_agent_id(flow: &Flow) -> Option<String> {
    if let Some(id) = flow.request.header("x-agent-id").or_else(|| flow.request.header("agent-id"))
    {
        return Some(id.to_owned());
    }

    if let Some(captures) = AGENT_ID_PATTERN.captures(&flow.request.url) {
        if let Some(id) = captures.get(1) {
            return Some(id.as_str().to_owned());
        }
    }

    if let Some(body) = flow.request.json() {
        for key in ["agent_id", "agentId", "sender", "from"] {
            if let Some(id) = body.get(key) {
                return match id {
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                };
            }
        }
    }

    None
}

#[async_trait]
impl Strategy for SwarmDisruptionStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "swarm_disruption"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        // Only inter-agent traffic is a valid target.
        if flow.metadata.traffic_type != Some(TrafficType::AgentToAgent) {
            return Ok(false);
        }
        if let Some(wanted) = &self.target_subtype {
            if flow.metadata.traffic_subtype.as_deref() != Some(wanted.as_str()) {
                return Ok(false);
            }
        }
        if !self.common.passes_probability() {
            return Ok(false);
        }

        match self.attack_type.as_str() {
            "message_mutation" => self.apply_message_mutation(flow).await,
            "consensus_delay" => self.apply_consensus_delay(flow).await,
            "agent_isolation" => self.apply_agent_isolation(flow).await,
            other => {
                warn!("Unknown attack type: {other}");
                Ok(false)
            }
        }
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        vec![("chaos.attack_mode", self.attack_type.clone())]
    }
}
