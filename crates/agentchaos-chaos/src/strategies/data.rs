//! Data layer attacks: JSON and NDJSON response corruption

use crate::strategy::{Strategy, StrategyCommon};
use agentchaos_config::StrategySpec;
use agentchaos_core::{ChaosError, ErrorCode, Flow};
use agentchaos_observability::record_error_code;
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

const DEFAULT_CORRUPTION_TEXT: &str = "💥 CHAOS 💥";

/// Corrupts JSON response data by replacing one randomly chosen scalar.
///
/// Handles both standard JSON and streaming NDJSON (one object per line);
/// for NDJSON exactly one valid line is corrupted and line boundaries are
/// preserved.
pub struct JsonCorruptionStrategy {
    common: StrategyCommon,
    corruption_text: String,
}

impl JsonCorruptionStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            corruption_text: spec
                .param_str("corruption_text")
                .unwrap_or(DEFAULT_CORRUPTION_TEXT)
                .to_owned(),
        })
    }

    pub fn corruption_text(&self) -> &str {
        &self.corruption_text
    }

    fn corrupt_ndjson(&self, text: &str) -> Option<String> {
        let mut lines: Vec<String> = text.split('\n').map(str::to_owned).collect();

        let valid_indices: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                let trimmed = line.trim();
                (trimmed.starts_with('{') || trimmed.starts_with('['))
                    && serde_json::from_str::<Value>(trimmed).is_ok()
            })
            .map(|(i, _)| i)
            .collect();

        if valid_indices.is_empty() {
            debug!("No valid JSON lines found in streaming response");
            return None;
        }

        let target = valid_indices[rand::rng().random_range(0..valid_indices.len())];
        let mut parsed: Value = serde_json::from_str(lines[target].trim()).ok()?;
        corrupt_value(&mut parsed, &self.corruption_text);
        lines[target] = parsed.to_string();

        Some(lines.join("\n"))
    }
}

/// Random walk to a single scalar leaf, replacing it with the corruption
/// text.
fn corrupt_value(value: &mut Value, corruption_text: &str) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            let keys: Vec<String> = map.keys().cloned().collect();
            let key = &keys[rand::rng().random_range(0..keys.len())];
            if let Some(inner) = map.get_mut(key) {
                corrupt_value(inner, corruption_text);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            let index = rand::rng().random_range(0..items.len());
            corrupt_value(&mut items[index], corruption_text);
        }
        other => *other = Value::String(corruption_text.to_owned()),
    }
}

#[async_trait]
impl Strategy for JsonCorruptionStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "data_corruption"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        let Some(response) = flow.response.as_mut() else {
            return Ok(false);
        };
        if !response.content_type().contains("json") {
            debug!("Skipping non-JSON response: {}", response.content_type());
            return Ok(false);
        }
        let Some(text) = response.text() else {
            return Ok(false);
        };
        if !self.common.passes_probability() {
            return Ok(false);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(mut data) => {
                corrupt_value(&mut data, &self.corruption_text);
                response.set_text(&data.to_string());
                response.set_header("Content-Type", "application/json");
                info!("Injecting JSON corruption (standard JSON) for {}", flow.request.path());
                Ok(true)
            }
            Err(_) => match self.corrupt_ndjson(&text) {
                Some(corrupted) => {
                    response.set_text(&corrupted);
                    response.set_header("Content-Type", "application/json");
                    info!("Injecting JSON corruption (streaming JSON) for {}", flow.request.path());
                    Ok(true)
                }
                None => {
                    warn!("[{}] Response not corruptible as JSON or NDJSON", ErrorCode::MutationFailed);
                    record_error_code(ErrorCode::MutationFailed, Some(self.name()));
                    Ok(false)
                }
            },
        }
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        vec![("chaos.corruption_text", self.corruption_text.clone())]
    }
}
