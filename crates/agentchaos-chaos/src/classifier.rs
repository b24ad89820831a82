//! Traffic classification for multi-agent systems
//!
//! Tags each flow as TOOL_CALL, LLM_API, AGENT_TO_AGENT, or UNKNOWN using
//! URL scoring, header heuristics, and body-shape heuristics, in that order.
//! Patterns come from built-in defaults merged with the plan's targets,
//! classifier rules, and rule packs.

use agentchaos_config::{ChaosPlan, ClassifierRules, TargetType};
use agentchaos_core::{
    ErrorCode, Flow, TrafficType, HEADER_AGENT_ROLE, HEADER_AGENT_ROLE_ALT, HEADER_CHAOS_SUBTYPE,
    HEADER_CHAOS_TYPE,
};
use agentchaos_observability::record_error_code;
use regex::{Regex, RegexBuilder};
use tracing::{debug, error, warn};
use url::Url;

/// Bodies above this size are not parsed for classification.
const MAX_BODY_CLASSIFY_BYTES: usize = 1_000_000;

/// Score bonus for matches that begin at or after the URL path.
const PATH_MATCH_BONUS: usize = 100;

const DEFAULT_LLM_PATTERNS: &[&str] = &[
    r".*openai\.com.*/v1/(chat|completions|embeddings)",
    r".*anthropic\.com.*/v1/messages",
    r".*api\.cohere\.ai.*/v1/generate",
    r".*api\.mistral\.ai.*/v1/chat",
    r".*127\.0\.0\.1:11434.*/api/(chat|generate)",
    r".*ollama.*/api/(chat|generate)",
];

const DEFAULT_TOOL_PATTERNS: &[&str] = &[
    r".*api\.(stripe|twilio|sendgrid|mailchimp)",
    r".*\.googleapis\.com.*",
    r".*localhost:8001.*",
    r".*/api/(search|book|query|execute)",
];

const DEFAULT_AGENT_PATTERNS: &[&str] = &[
    r".*agent-[a-z0-9]+.*",
    r".*swarm.*/messages",
    r".*localhost:\d+/agent-.*",
    r".*/api/agent/.*",
];

fn compile(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Invalid classifier pattern '{pattern}': {e}");
            None
        }
    }
}

/// Classifies HTTP traffic for targeted chaos injection.
pub struct TrafficClassifier {
    llm_patterns: Vec<Regex>,
    tool_patterns: Vec<Regex>,
    agent_patterns: Vec<Regex>,
    allow_client_override: bool,
    plan_loaded: bool,
    has_rule_packs: bool,
    strict: bool,
}

impl TrafficClassifier {
    /// Build a classifier from the active plan (or defaults when no plan is
    /// loaded). Rebuilt wholesale on plan reload.
    pub fn new(plan: Option<&ChaosPlan>, strict: bool) -> Self {
        let mut llm_patterns = Vec::new();
        let mut tool_patterns = Vec::new();
        let mut agent_patterns = Vec::new();

        if let Some(plan) = plan {
            // Targets whose type marks a traffic category contribute patterns.
            for target in &plan.targets {
                let bucket = match target.target_type {
                    TargetType::LlmInput => Some(&mut llm_patterns),
                    TargetType::ToolCall => Some(&mut tool_patterns),
                    TargetType::Custom if target.name.to_ascii_lowercase().contains("agent") => {
                        Some(&mut agent_patterns)
                    }
                    _ => None,
                };
                if let (Some(bucket), Some(regex)) = (bucket, compile(&target.pattern)) {
                    bucket.push(regex);
                }
            }

            if let Some(rules) = &plan.classifier_rules {
                load_rule_set(rules, &mut llm_patterns, &mut tool_patterns, &mut agent_patterns);
            }

            // All rule packs are merged.
            for pack in &plan.classifier_rule_packs {
                load_rule_set(&pack.rules, &mut llm_patterns, &mut tool_patterns, &mut agent_patterns);
            }
        }

        for pattern in DEFAULT_LLM_PATTERNS {
            llm_patterns.extend(compile(pattern));
        }
        for pattern in DEFAULT_TOOL_PATTERNS {
            tool_patterns.extend(compile(pattern));
        }
        for pattern in DEFAULT_AGENT_PATTERNS {
            agent_patterns.extend(compile(pattern));
        }

        debug!(
            "TrafficClassifier initialized: LLM={}, Tool={}, Agent={}",
            llm_patterns.len(),
            tool_patterns.len(),
            agent_patterns.len()
        );

        Self {
            llm_patterns,
            tool_patterns,
            agent_patterns,
            allow_client_override: plan.map(ChaosPlan::allow_client_override).unwrap_or(false),
            plan_loaded: plan.is_some(),
            has_rule_packs: plan.map(|p| !p.classifier_rule_packs.is_empty()).unwrap_or(false),
            strict,
        }
    }

    /// Classify a flow, memoizing the result in the flow metadata.
    ///
    /// `override_authenticated` reflects whether the request authenticated
    /// for READ; either that or the plan's `allow_client_override` metadata
    /// gates the `X-Agent-Chaos-Type` override header.
    pub fn classify(&self, flow: &mut Flow, override_authenticated: bool) -> TrafficType {
        if let Some(existing) = flow.metadata.traffic_type {
            return existing;
        }

        // Explicit override via header (manual control)
        if let Some(override_value) = flow.request.header(HEADER_CHAOS_TYPE) {
            if self.allow_client_override || override_authenticated {
                let traffic_type = TrafficType::parse(override_value);
                let subtype = flow.request.header(HEADER_CHAOS_SUBTYPE).map(str::to_owned);
                flow.metadata.traffic_type = Some(traffic_type);
                flow.metadata.traffic_subtype = subtype;
                debug!("Traffic type override via header: {traffic_type}");
                return traffic_type;
            }
        }

        // Strict mode: production deployments must ship rule packs.
        if self.strict && self.plan_loaded && !self.has_rule_packs {
            error!(
                "[{}] Classifier strict mode enabled but no classifier_rule_packs configured",
                ErrorCode::ClassifierStrictMissingRules
            );
            record_error_code(ErrorCode::ClassifierStrictMissingRules, Some("classifier"));
            flow.metadata.traffic_type = Some(TrafficType::Unknown);
            return TrafficType::Unknown;
        }

        let url = flow.request.url.clone();
        let agent_score = best_pattern_score(&url, &self.agent_patterns);
        let llm_score = best_pattern_score(&url, &self.llm_patterns);
        let tool_score = best_pattern_score(&url, &self.tool_patterns);
        let max_score = agent_score.max(llm_score).max(tool_score);

        let (traffic_type, mut subtype) = if max_score > 0 {
            // Higher score wins; ties break by explicit priority.
            let priority = [
                (TrafficType::AgentToAgent, agent_score),
                (TrafficType::LlmApi, llm_score),
                (TrafficType::ToolCall, tool_score),
            ];
            let best = priority
                .iter()
                .find(|(_, score)| *score == max_score)
                .map(|(t, _)| *t)
                .unwrap_or(TrafficType::Unknown);

            let subtype = if best == TrafficType::AgentToAgent {
                Some(self.detect_agent_subtype(flow))
            } else {
                None
            };

            // Body-based classification overrides the URL result when it
            // resolves more specifically.
            let (body_type, body_subtype) = classify_by_body(flow);
            if body_type != TrafficType::Unknown && body_type != best {
                (body_type, body_subtype)
            } else {
                (best, subtype)
            }
        } else {
            let (header_type, header_subtype) = classify_by_headers(flow);
            if header_type != TrafficType::Unknown {
                (header_type, header_subtype)
            } else {
                classify_by_body(flow)
            }
        };

        if traffic_type == TrafficType::AgentToAgent && subtype.is_none() {
            subtype = Some(self.detect_agent_subtype(flow));
        }

        flow.metadata.traffic_type = Some(traffic_type);
        if subtype.is_some() {
            flow.metadata.traffic_subtype = subtype.clone();
        }

        debug!(
            "Classified traffic -> {traffic_type}{}",
            subtype.map(|s| format!(" ({s})")).unwrap_or_default()
        );
        traffic_type
    }

    fn detect_agent_subtype(&self, flow: &Flow) -> String {
        let url = flow.request.url.to_ascii_lowercase();

        if url.contains("supervisor") || url.contains("manager") {
            return "supervisor_to_worker".to_owned();
        }
        if url.contains("consensus") || url.contains("vote") {
            return "consensus_vote".to_owned();
        }
        if url.contains("worker") || url.contains("agent-") {
            return "worker_communication".to_owned();
        }

        if flow.request.header("x-swarm-phase") == Some("consensus") {
            return "consensus_vote".to_owned();
        }
        if flow.request.header(HEADER_AGENT_ROLE) == Some("supervisor") {
            return "supervisor_to_worker".to_owned();
        }

        if let Some(body) = flow.request.text() {
            let lower = body.to_ascii_lowercase();
            if lower.contains("consensus") || lower.contains("vote") {
                return "consensus_vote".to_owned();
            }
        }

        "agent_to_agent".to_owned()
    }
}

fn load_rule_set(
    rules: &ClassifierRules,
    llm: &mut Vec<Regex>,
    tool: &mut Vec<Regex>,
    agent: &mut Vec<Regex>,
) {
    llm.extend(rules.llm_patterns.iter().filter_map(|p| compile(p)));
    tool.extend(rules.tool_patterns.iter().filter_map(|p| compile(p)));
    agent.extend(rules.agent_patterns.iter().filter_map(|p| compile(p)));
}

/// Best match score for a URL: longest match length, plus a bonus when the
/// match begins at or after the path (path-specific patterns beat
/// host-generic ones).
fn best_pattern_score(url: &str, patterns: &[Regex]) -> usize {
    let path_index = Url::parse(url)
        .ok()
        .map(|parsed| {
            let path = parsed.path();
            if path.is_empty() {
                url.len()
            } else {
                url.find(path).unwrap_or(url.len())
            }
        })
        .unwrap_or(url.len());

    let mut best = 0;
    for pattern in patterns {
        let Some(found) = pattern.find(url) else {
            continue;
        };
        let match_len = found.end() - found.start();
        let bonus = if found.start() >= path_index { PATH_MATCH_BONUS } else { 0 };
        best = best.max(match_len + bonus);
    }
    best
}

fn classify_by_headers(flow: &Flow) -> (TrafficType, Option<String>) {
    let request = &flow.request;

    if request.header("x-agent-to-agent").is_some() || request.header("x-swarm-message").is_some() {
        return (TrafficType::AgentToAgent, Some("swarm_message".to_owned()));
    }

    if request.header(HEADER_AGENT_ROLE).is_some() || request.header(HEADER_AGENT_ROLE_ALT).is_some()
    {
        return (TrafficType::AgentToAgent, Some("role_header".to_owned()));
    }

    if request
        .header("user-agent")
        .map(|ua| ua.to_ascii_lowercase().contains("autogen"))
        .unwrap_or(false)
    {
        return (TrafficType::AgentToAgent, Some("autogen".to_owned()));
    }

    if let Some(auth) = request.header("authorization") {
        if (auth.contains("sk-") || auth.contains("Bearer"))
            && (request.url.contains("openai") || request.url.contains("anthropic"))
        {
            return (TrafficType::LlmApi, None);
        }
    }

    (TrafficType::Unknown, None)
}

fn classify_by_body(flow: &Flow) -> (TrafficType, Option<String>) {
    if flow.request.body.is_empty() || flow.request.body.len() > MAX_BODY_CLASSIFY_BYTES {
        return (TrafficType::Unknown, None);
    }

    let Some(body) = flow.request.json() else {
        return (TrafficType::Unknown, None);
    };
    let Some(object) = body.as_object() else {
        return (TrafficType::Unknown, None);
    };

    // LLM chat shape: messages list, possibly carrying tool calls
    if let Some(messages) = object.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            let Some(message) = message.as_object() else {
                continue;
            };
            if message.contains_key("tool_calls") || message.contains_key("function_call") {
                return (TrafficType::ToolCall, Some("llm_tool_call".to_owned()));
            }
            if let Some(role) = message.get("role").and_then(|r| r.as_str()) {
                if matches!(role, "system" | "user" | "assistant")
                    && (object.contains_key("model") || object.contains_key("temperature"))
                {
                    return (TrafficType::LlmApi, None);
                }
            }
        }
    }

    // AutoGen and swarm shapes
    if object.contains_key("sender") && object.contains_key("receiver") {
        return (TrafficType::AgentToAgent, Some("autogen_message".to_owned()));
    }
    if object.contains_key("agent_id") || object.contains_key("swarm_id") {
        return (TrafficType::AgentToAgent, Some("swarm_message".to_owned()));
    }
    if object.contains_key("from_agent")
        || object.contains_key("to_agent")
        || object.contains_key("agent_role")
    {
        return (TrafficType::AgentToAgent, Some("agent_metadata".to_owned()));
    }

    // Direct tool invocation shape
    if ["tool", "function", "action", "command"].iter().any(|k| object.contains_key(*k)) {
        return (TrafficType::ToolCall, Some("direct_tool_call".to_owned()));
    }

    (TrafficType::Unknown, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchaos_core::FlowRequest;
    use http::Method;

    fn classifier() -> TrafficClassifier {
        TrafficClassifier::new(None, false)
    }

    fn flow(url: &str) -> Flow {
        Flow::new(FlowRequest::new(Method::POST, url))
    }

    fn json_flow(url: &str, body: serde_json::Value) -> Flow {
        let mut f = flow(url);
        f.request.set_header("Content-Type", "application/json");
        f.request.set_json(&body);
        f
    }

    #[test]
    fn test_llm_url_classification() {
        let mut f = flow("https://api.openai.com/v1/chat/completions");
        assert_eq!(classifier().classify(&mut f, false), TrafficType::LlmApi);
        assert_eq!(f.metadata.traffic_type, Some(TrafficType::LlmApi));
    }

    #[test]
    fn test_tool_url_classification() {
        let mut f = flow("http://localhost:8001/search_flights");
        assert_eq!(classifier().classify(&mut f, false), TrafficType::ToolCall);
    }

    #[test]
    fn test_agent_url_classification_with_subtype() {
        let mut f = flow("http://localhost:9300/agent-worker7/messages");
        assert_eq!(classifier().classify(&mut f, false), TrafficType::AgentToAgent);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("worker_communication"));
    }

    #[test]
    fn test_priority_tie_break_prefers_agent() {
        // Craft a classifier whose categories all match the same span.
        let plan: ChaosPlan = serde_yaml::from_str(
            r#"
classifier_rules:
  llm_patterns: ["/api/thing"]
  tool_patterns: ["/api/thing"]
  agent_patterns: ["/api/thing"]
"#,
        )
        .unwrap();
        let classifier = TrafficClassifier::new(Some(&plan), false);

        let mut f = flow("http://host/api/thing");
        assert_eq!(classifier.classify(&mut f, false), TrafficType::AgentToAgent);
    }

    #[test]
    fn test_memoized_result_is_reused() {
        let mut f = flow("https://api.openai.com/v1/chat/completions");
        let c = classifier();
        assert_eq!(c.classify(&mut f, false), TrafficType::LlmApi);
        // Rewriting the URL does not reclassify
        f.request.url = "http://localhost:8001/search_flights".to_owned();
        assert_eq!(c.classify(&mut f, false), TrafficType::LlmApi);
    }

    #[test]
    fn test_override_header_requires_permission() {
        let c = classifier();

        let mut f = flow("https://api.openai.com/v1/chat/completions");
        f.request.set_header("X-Agent-Chaos-Type", "AGENT_TO_AGENT");
        // Not authenticated and no plan override: the header is ignored
        assert_eq!(c.classify(&mut f, false), TrafficType::LlmApi);

        let mut f = flow("https://api.openai.com/v1/chat/completions");
        f.request.set_header("X-Agent-Chaos-Type", "AGENT_TO_AGENT");
        f.request.set_header("X-Agent-Chaos-Subtype", "consensus_vote");
        assert_eq!(c.classify(&mut f, true), TrafficType::AgentToAgent);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("consensus_vote"));
    }

    #[test]
    fn test_strict_mode_requires_rule_packs() {
        let plan = ChaosPlan::default();
        let strict = TrafficClassifier::new(Some(&plan), true);
        let mut f = flow("https://api.openai.com/v1/chat/completions");
        assert_eq!(strict.classify(&mut f, false), TrafficType::Unknown);
    }

    #[test]
    fn test_strict_mode_satisfied_by_rule_packs() {
        let plan: ChaosPlan = serde_yaml::from_str(
            r#"
classifier_rule_packs:
  - name: prod
    rules:
      llm_patterns: [".*llm.internal.*"]
"#,
        )
        .unwrap();
        let strict = TrafficClassifier::new(Some(&plan), true);
        let mut f = flow("https://llm.internal/v1/chat");
        assert_eq!(strict.classify(&mut f, false), TrafficType::LlmApi);
    }

    #[test]
    fn test_header_heuristics() {
        let c = classifier();

        let mut f = flow("http://unknown.example/x");
        f.request.set_header("X-Swarm-Message", "1");
        assert_eq!(c.classify(&mut f, false), TrafficType::AgentToAgent);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("swarm_message"));

        let mut f = flow("http://unknown.example/x");
        f.request.set_header("User-Agent", "AutoGen/0.4");
        assert_eq!(c.classify(&mut f, false), TrafficType::AgentToAgent);
    }

    #[test]
    fn test_body_tool_call_detection() {
        let mut f = json_flow(
            "http://unknown.example/x",
            serde_json::json!({
                "messages": [
                    {"role": "assistant", "tool_calls": [{"function": {"name": "search"}}]}
                ]
            }),
        );
        assert_eq!(classifier().classify(&mut f, false), TrafficType::ToolCall);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("llm_tool_call"));
    }

    #[test]
    fn test_body_llm_detection() {
        let mut f = json_flow(
            "http://unknown.example/x",
            serde_json::json!({
                "model": "llama3.2",
                "messages": [{"role": "user", "content": "hi"}]
            }),
        );
        assert_eq!(classifier().classify(&mut f, false), TrafficType::LlmApi);
    }

    #[test]
    fn test_body_autogen_detection() {
        let mut f = json_flow(
            "http://unknown.example/x",
            serde_json::json!({"sender": "planner", "receiver": "searcher"}),
        );
        assert_eq!(classifier().classify(&mut f, false), TrafficType::AgentToAgent);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("autogen_message"));
    }

    #[test]
    fn test_body_direct_tool_keys() {
        let mut f = json_flow(
            "http://unknown.example/x",
            serde_json::json!({"tool": "calculator", "args": {"a": 1}}),
        );
        assert_eq!(classifier().classify(&mut f, false), TrafficType::ToolCall);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("direct_tool_call"));
    }

    #[test]
    fn test_body_overrides_url_when_more_specific() {
        // URL says tool endpoint, body says AutoGen inter-agent message.
        let mut f = json_flow(
            "http://localhost:8001/relay",
            serde_json::json!({"sender": "a", "receiver": "b"}),
        );
        assert_eq!(classifier().classify(&mut f, false), TrafficType::AgentToAgent);
    }

    #[test]
    fn test_unknown_for_unmatched_traffic() {
        let mut f = flow("http://unrelated.example/static/logo.png");
        assert_eq!(classifier().classify(&mut f, false), TrafficType::Unknown);
    }

    #[test]
    fn test_consensus_subtype_from_url() {
        let mut f = flow("http://localhost:9300/agent-pool/consensus");
        let c = classifier();
        assert_eq!(c.classify(&mut f, false), TrafficType::AgentToAgent);
        assert_eq!(f.metadata.traffic_subtype.as_deref(), Some("consensus_vote"));
    }
}
