//! Schema-aware fuzzing of tool-call protocols
//!
//! Intercepts tool calls (OpenAI `tool_calls`/`function_call`, Anthropic
//! `tool_use` blocks, or direct POSTs to tool endpoints) and injects faults
//! matched to each argument's type, producing logic errors rather than plain
//! network errors.

use crate::strategy::{Strategy, StrategyCommon};
use agentchaos_config::StrategySpec;
use agentchaos_core::{ChaosError, Flow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const DATE_FIELDS: &[&str] = &[
    "date", "time", "datetime", "timestamp", "departure", "arrival", "checkin", "checkout",
];

const NUMERIC_FIELDS: &[&str] = &[
    "price", "amount", "cost", "quantity", "count", "number", "id", "age", "seats", "passengers",
];

const STRING_FIELDS: &[&str] = &[
    "name", "description", "message", "text", "content", "origin", "destination", "city",
];

const SQL_INJECTION_PAYLOADS: &[&str] = &[
    "' OR '1'='1",
    "'; DROP TABLE users; --",
    "' UNION SELECT * FROM users --",
    "1' OR '1'='1",
    "admin'--",
    "' OR 1=1--",
    "1' UNION SELECT NULL--",
];

const INVALID_DATE_FORMATS: &[&str] = &[
    "2025/13/40",
    "yesterday",
    "tomorrow",
    "2025-13-01",
    "2025-02-30",
    "2025-00-01",
    "2025-01-00",
    "13/40/2025",
    "2025-1-1",
    "25-12-2025",
];

/// Buffer-overflow payload sizes in bytes.
const OVERFLOW_SIZES: &[(&str, usize)] = &[
    ("small", 1_000),
    ("medium", 10_000),
    ("large", 100_000),
    ("huge", 1_000_000),
    ("massive", 10_000_000),
];

static ISO_DATE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

fn pick<'a, T>(items: &'a [T]) -> &'a T {
    &items[rand::rng().random_range(0..items.len())]
}

fn overflow_payload(size_name: &str) -> String {
    let size = OVERFLOW_SIZES
        .iter()
        .find(|(name, _)| *name == size_name)
        .map(|(_, size)| *size)
        .unwrap_or(100_000);
    "A".repeat(size)
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Classifies argument fields and produces type-matched mutations.
pub struct SchemaAwareFuzzer;

impl SchemaAwareFuzzer {
    /// Classify a field by name keyword, then by runtime type.
    pub fn detect_field_type(field_name: &str, field_value: &Value) -> &'static str {
        let lower = field_name.to_ascii_lowercase();

        if DATE_FIELDS.iter().any(|p| lower.contains(p)) {
            return "date";
        }
        if NUMERIC_FIELDS.iter().any(|p| lower.contains(p)) {
            return "numeric";
        }
        if STRING_FIELDS.iter().any(|p| lower.contains(p)) {
            return "string";
        }

        match field_value {
            Value::Number(_) => "numeric",
            Value::String(s) if ISO_DATE_PREFIX.is_match(s) => "date",
            Value::String(_) => "string",
            _ => "unknown",
        }
    }

    pub fn fuzz_date_field(_original: &Value, mode: &str) -> Value {
        match mode {
            "invalid_format" => Value::String((*pick(INVALID_DATE_FORMATS)).to_owned()),
            "sql_injection" => Value::String((*pick(SQL_INJECTION_PAYLOADS)).to_owned()),
            "relative_date" => {
                Value::String((*pick(&["yesterday", "tomorrow", "today", "next week"])).to_owned())
            }
            _ => {
                let choices = [*pick(INVALID_DATE_FORMATS), *pick(SQL_INJECTION_PAYLOADS), "yesterday"];
                Value::String((*pick(&choices)).to_owned())
            }
        }
    }

    pub fn fuzz_numeric_field(original: &Value, mode: &str) -> Value {
        match mode {
            "type_mismatch" => Value::String(format!("{}abc", value_to_display(original))),
            "negative" => match original.as_f64() {
                Some(n) if n > 0.0 => serde_json::json!(-n.abs()),
                _ => serde_json::json!(-999_999),
            },
            "max_int" => serde_json::json!(i64::from(i32::MAX)),
            "zero" => serde_json::json!(0),
            "null" => Value::Null,
            _ => match rand::rng().random_range(0..5) {
                0 => Value::String(format!("{}abc", value_to_display(original))),
                1 => serde_json::json!(-999_999),
                2 => serde_json::json!(i64::from(i32::MAX)),
                3 => serde_json::json!(0),
                _ => Value::Null,
            },
        }
    }

    pub fn fuzz_string_field(_original: &Value, mode: &str) -> Value {
        match mode {
            "buffer_overflow" => {
                let size = pick(&["medium", "large", "huge", "massive"]);
                Value::String(overflow_payload(size))
            }
            "empty" => Value::String(String::new()),
            "sql_injection" => Value::String((*pick(SQL_INJECTION_PAYLOADS)).to_owned()),
            "xss" => Value::String("<script>alert('XSS')</script>".to_owned()),
            _ => match rand::rng().random_range(0..3) {
                0 => Value::String(overflow_payload("large")),
                1 => Value::String(String::new()),
                _ => Value::String((*pick(SQL_INJECTION_PAYLOADS)).to_owned()),
            },
        }
    }

    /// Fuzz a field by its detected type. Returns `None` when no sensible
    /// mutation exists (the field is left untouched).
    pub fn fuzz_field(field_value: &Value, field_type: &str, mode: &str) -> Option<Value> {
        match field_type {
            "date" => Some(Self::fuzz_date_field(field_value, mode)),
            "numeric" => Some(Self::fuzz_numeric_field(field_value, mode)),
            "string" => Some(Self::fuzz_string_field(field_value, mode)),
            _ => match field_value {
                Value::String(_) => Some(Self::fuzz_string_field(field_value, mode)),
                Value::Number(_) => Some(Self::fuzz_numeric_field(field_value, mode)),
                _ => None,
            },
        }
    }
}

/// Schema-aware protocol fuzzing strategy.
pub struct McpFuzzingStrategy {
    common: StrategyCommon,
    fuzz_type: String,
    target_endpoint: Option<String>,
    field_mode: HashMap<String, String>,
}

const VALID_FUZZ_TYPES: &[&str] = &[
    "schema_violation",
    "type_mismatch",
    "null_injection",
    "garbage_value",
    "random",
];

const TOOL_URL_MARKERS: &[&str] = &[
    "/search_flights",
    "/book_ticket",
    "/v1/chat/completions",
    "/v1/messages",
    "/api/chat",
];

impl McpFuzzingStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        let mut fuzz_type = spec.param_str("fuzz_type").unwrap_or("schema_violation").to_owned();
        if !VALID_FUZZ_TYPES.contains(&fuzz_type.as_str()) {
            warn!("Invalid fuzz_type: {fuzz_type}. Using 'schema_violation'.");
            fuzz_type = "schema_violation".to_owned();
        }

        let field_mode = spec
            .params
            .get("field_mode")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            fuzz_type,
            target_endpoint: spec.param_str("target_endpoint").map(str::to_owned),
            field_mode,
        })
    }

    pub fn fuzz_type(&self) -> &str {
        &self.fuzz_type
    }

    pub fn target_endpoint(&self) -> Option<&str> {
        self.target_endpoint.as_deref()
    }

    fn is_tool_call_request(&self, flow: &Flow) -> bool {
        if flow.request.body.is_empty()
            || !flow.request.content_type().contains("application/json")
        {
            return false;
        }
        let Some(body) = flow.request.json() else {
            return false;
        };
        let Some(object) = body.as_object() else {
            return false;
        };

        if object.contains_key("tool_calls") || object.contains_key("function_call") {
            return true;
        }

        if let Some(messages) = object.get("messages").and_then(|m| m.as_array()) {
            for message in messages {
                let Some(message) = message.as_object() else {
                    continue;
                };
                if message.contains_key("tool_calls") || message.contains_key("function_call") {
                    return true;
                }
                if let Some(blocks) = message.get("content").and_then(|c| c.as_array()) {
                    if blocks
                        .iter()
                        .any(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
                    {
                        return true;
                    }
                }
            }
        }

        // Direct tool invocation: POST to a known tool endpoint with
        // structured parameters.
        if flow.request.method == http::Method::POST {
            let url = flow.request.url.to_ascii_lowercase();
            let endpoint_match = TOOL_URL_MARKERS.iter().any(|m| url.contains(m))
                || self
                    .target_endpoint
                    .as_deref()
                    .map(|e| url.contains(&e.to_ascii_lowercase()))
                    .unwrap_or(false);
            if endpoint_match {
                let indicator_keys = [
                    "origin",
                    "destination",
                    "date",
                    "flight_id",
                    "tool_calls",
                    "function_call",
                    "messages",
                ];
                if indicator_keys.iter().any(|k| object.contains_key(*k)) {
                    return true;
                }
            }
        }

        false
    }

    /// Fuzz every classifiable field of an argument object. Returns true when
    /// at least one field changed.
    fn fuzz_arguments(&self, arguments: &mut serde_json::Map<String, Value>) -> bool {
        let mut fuzzed = 0usize;
        let keys: Vec<String> = arguments.keys().cloned().collect();

        for key in keys {
            let Some(value) = arguments.get(&key) else {
                continue;
            };
            let field_type = SchemaAwareFuzzer::detect_field_type(&key, value);
            if field_type == "unknown" {
                continue;
            }
            let mode = self.field_mode.get(field_type).map(String::as_str).unwrap_or("random");
            if let Some(mutated) = SchemaAwareFuzzer::fuzz_field(value, field_type, mode) {
                debug!("Fuzzed field '{key}' ({field_type})");
                arguments.insert(key, mutated);
                fuzzed += 1;
            }
        }

        if fuzzed > 0 {
            warn!("Schema-aware fuzzing: {fuzzed} fields fuzzed");
        }
        fuzzed > 0
    }

    fn apply_schema_violation(&self, body: &mut Value) -> bool {
        let Some(object) = body.as_object() else {
            return false;
        };
        let is_direct = !object.contains_key("tool_calls")
            && !object.contains_key("function_call")
            && !object.contains_key("messages");

        if is_direct {
            if let Some(object) = body.as_object_mut() {
                return self.fuzz_arguments(object);
            }
            return false;
        }

        let mut fuzzed = false;
        let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) else {
            return false;
        };

        for message in messages {
            // OpenAI tool_calls with stringified or inline arguments
            if let Some(tool_calls) = message.get_mut("tool_calls").and_then(|t| t.as_array_mut()) {
                for tool_call in tool_calls {
                    fuzzed |= self.fuzz_function_arguments(tool_call.get_mut("function"));
                }
            }
            fuzzed |= self.fuzz_function_arguments(message.get_mut("function_call"));

            // Anthropic tool_use content blocks
            if let Some(blocks) = message.get_mut("content").and_then(|c| c.as_array_mut()) {
                for block in blocks {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        if let Some(input) = block.get_mut("input").and_then(|i| i.as_object_mut()) {
                            fuzzed |= self.fuzz_arguments(input);
                        }
                    }
                }
            }
        }

        fuzzed
    }

    /// Fuzz a `{"name": ..., "arguments": ...}` function object, where the
    /// arguments may be an inline object or a JSON-encoded string.
    fn fuzz_function_arguments(&self, function: Option<&mut Value>) -> bool {
        let Some(function) = function else {
            return false;
        };
        let Some(arguments) = function.get_mut("arguments") else {
            return false;
        };

        match arguments {
            Value::Object(map) => self.fuzz_arguments(map),
            Value::String(encoded) => {
                let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(encoded) else {
                    return false;
                };
                if self.fuzz_arguments(&mut map) {
                    *arguments = Value::String(Value::Object(map).to_string());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn apply_type_mismatch(&self, body: &mut Value) -> bool {
        if let Some(object) = body.as_object_mut() {
            let keys: Vec<String> = object.keys().cloned().collect();
            for key in keys {
                if let Some(value) = object.get(&key) {
                    if value.is_number() {
                        let mutated = Value::String(format!("{}abc", value_to_display(value)));
                        object.insert(key, mutated);
                        return true;
                    }
                }
            }
        }
        false
    }

    fn apply_null_injection(&self, body: &mut Value) -> bool {
        if let Some(object) = body.as_object_mut() {
            let keys: Vec<String> = object.keys().cloned().collect();
            if keys.is_empty() {
                return false;
            }
            let key = keys[rand::rng().random_range(0..keys.len())].clone();
            object.insert(key, Value::Null);
            return true;
        }
        false
    }

    fn apply_garbage_value(&self, body: &mut Value) -> bool {
        if let Some(object) = body.as_object_mut() {
            let keys: Vec<String> = object.keys().cloned().collect();
            if keys.is_empty() {
                return false;
            }
            let key = keys[rand::rng().random_range(0..keys.len())].clone();
            object.insert(key, Value::String("💥 CHAOS 💥".to_owned()));
            return true;
        }
        false
    }
}

#[async_trait]
impl Strategy for McpFuzzingStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "mcp_fuzzing"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        if flow.response.is_some() {
            return Ok(false);
        }
        if !self.is_tool_call_request(flow) {
            return Ok(false);
        }
        if let Some(endpoint) = &self.target_endpoint {
            if !flow.request.url.contains(endpoint.as_str()) {
                return Ok(false);
            }
        }
        let Some(mut body) = flow.request.json() else {
            return Ok(false);
        };
        if !self.common.passes_probability() {
            return Ok(false);
        }

        let fuzzed = match self.fuzz_type.as_str() {
            "schema_violation" => self.apply_schema_violation(&mut body),
            "type_mismatch" => self.apply_type_mismatch(&mut body),
            "null_injection" => self.apply_null_injection(&mut body),
            "garbage_value" => self.apply_garbage_value(&mut body),
            _ => match rand::rng().random_range(0..4) {
                0 => self.apply_schema_violation(&mut body),
                1 => self.apply_type_mismatch(&mut body),
                2 => self.apply_null_injection(&mut body),
                _ => self.apply_garbage_value(&mut body),
            },
        };

        if fuzzed {
            flow.request.set_json(&body);
            warn!("Schema-aware fuzzing applied to {}: type={}", flow.request.path(), self.fuzz_type);
        }
        Ok(fuzzed)
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![("chaos.fuzz_type", self.fuzz_type.clone())];
        if let Some(endpoint) = &self.target_endpoint {
            attributes.push(("chaos.target_endpoint", endpoint.clone()));
        }
        attributes
    }
}
