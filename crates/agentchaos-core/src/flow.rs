//! In-memory model of one intercepted request/response pair
//!
//! A [`Flow`] is created when a request enters the proxy and released once the
//! response has been returned to the client. Strategies mutate the flow in
//! place; the pipeline reads per-flow state from [`FlowMetadata`].

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Header carrying an explicit classification override.
pub const HEADER_CHAOS_TYPE: &str = "x-agent-chaos-type";
/// Companion subtype header for the classification override.
pub const HEADER_CHAOS_SUBTYPE: &str = "x-agent-chaos-subtype";
/// Primary agent-role header injected by swarm runners.
pub const HEADER_AGENT_ROLE: &str = "x-agent-role";
/// Alternate agent-role header.
pub const HEADER_AGENT_ROLE_ALT: &str = "agent-role";

/// Traffic categories assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficType {
    /// Agent calling an external tool/API
    ToolCall,
    /// Agent calling an LLM service
    LlmApi,
    /// Inter-agent communication
    AgentToAgent,
    /// Anything the classifier could not place
    Unknown,
}

impl TrafficType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficType::ToolCall => "TOOL_CALL",
            TrafficType::LlmApi => "LLM_API",
            TrafficType::AgentToAgent => "AGENT_TO_AGENT",
            TrafficType::Unknown => "UNKNOWN",
        }
    }

    /// Parse the wire form (as used in override headers and logs).
    pub fn parse(value: &str) -> TrafficType {
        match value.to_ascii_uppercase().as_str() {
            "TOOL_CALL" => TrafficType::ToolCall,
            "LLM_API" => TrafficType::LlmApi,
            "AGENT_TO_AGENT" => TrafficType::AgentToAgent,
            _ => TrafficType::Unknown,
        }
    }
}

impl fmt::Display for TrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of the flow a hook is operating on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_body(headers: &mut HeaderMap, body: &mut Vec<u8>, new_body: Vec<u8>) {
    if let Ok(len) = HeaderValue::from_str(&new_body.len().to_string()) {
        headers.insert(CONTENT_LENGTH, len);
    }
    *body = new_body;
}

/// The client request half of a flow.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub method: Method,
    /// Absolute request URL as seen by the proxy.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FlowRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Lowercased `Content-Type`, or an empty string when absent.
    pub fn content_type(&self) -> String {
        self.header(CONTENT_TYPE.as_str()).unwrap_or("").to_ascii_lowercase()
    }

    /// Body decoded as UTF-8 (lossy); `None` for an empty body.
    pub fn text(&self) -> Option<String> {
        if self.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.body).into_owned())
        }
    }

    /// Body parsed as JSON, when it is valid JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.text().and_then(|t| serde_json::from_str(&t).ok())
    }

    /// Replace the body with text, keeping `Content-Length` in sync.
    pub fn set_text(&mut self, text: &str) {
        let bytes = text.as_bytes().to_vec();
        set_body(&mut self.headers, &mut self.body, bytes);
    }

    pub fn set_json(&mut self, value: &serde_json::Value) {
        self.set_text(&value.to_string());
    }

    pub fn host(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default()
    }

    pub fn scheme(&self) -> String {
        Url::parse(&self.url).map(|u| u.scheme().to_owned()).unwrap_or_default()
    }

    pub fn path(&self) -> String {
        Url::parse(&self.url).map(|u| u.path().to_owned()).unwrap_or_default()
    }
}

/// The server (or synthesized) response half of a flow.
#[derive(Debug, Clone)]
pub struct FlowResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FlowResponse {
    /// Build a response from parts, filling in the canonical reason phrase.
    pub fn make(status_code: u16, body: Vec<u8>, headers: &[(&str, &str)]) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
        if let Ok(len) = HeaderValue::from_str(&body.len().to_string()) {
            map.insert(CONTENT_LENGTH, len);
        }
        Self {
            status_code,
            reason: canonical_reason(status_code).to_owned(),
            headers: map,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.headers.remove(name);
        }
    }

    pub fn content_type(&self) -> String {
        self.header(CONTENT_TYPE.as_str()).unwrap_or("").to_ascii_lowercase()
    }

    pub fn content_encoding(&self) -> Option<String> {
        self.header("content-encoding").map(|v| v.to_ascii_lowercase())
    }

    pub fn text(&self) -> Option<String> {
        if self.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.body).into_owned())
        }
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        self.text().and_then(|t| serde_json::from_str(&t).ok())
    }

    pub fn set_text(&mut self, text: &str) {
        let bytes = text.as_bytes().to_vec();
        set_body(&mut self.headers, &mut self.body, bytes);
    }

    pub fn set_json(&mut self, value: &serde_json::Value) {
        self.set_text(&value.to_string());
    }

    /// Replace the raw body bytes, keeping `Content-Length` in sync.
    pub fn set_content(&mut self, content: Vec<u8>) {
        set_body(&mut self.headers, &mut self.body, content);
    }
}

/// Canonical HTTP reason phrase for a status code.
pub fn canonical_reason(status_code: u16) -> &'static str {
    http::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Per-flow state carried from the request hook to the response hook.
#[derive(Debug, Clone, Default)]
pub struct FlowMetadata {
    pub request_id: String,
    pub traffic_type: Option<TrafficType>,
    pub traffic_subtype: Option<String>,
    pub agent_role: Option<String>,
    /// Strategy names that mutated this flow, deduplicated, insertion-ordered.
    pub applied_strategies: Vec<String>,
    /// Set when authentication denied the request; the pipeline stops here.
    pub aborted: bool,
    /// Set when the response was reconstructed from a tape.
    pub from_playback: bool,
}

/// One intercepted request/response pair.
#[derive(Debug, Clone)]
pub struct Flow {
    pub request: FlowRequest,
    pub response: Option<FlowResponse>,
    pub metadata: FlowMetadata,
}

impl Flow {
    pub fn new(request: FlowRequest) -> Self {
        Self {
            request,
            response: None,
            metadata: FlowMetadata::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.response.is_some() {
            Phase::Response
        } else {
            Phase::Request
        }
    }

    /// Record that a strategy mutated this flow (idempotent per name).
    pub fn record_applied(&mut self, name: &str) {
        if !self.metadata.applied_strategies.iter().any(|s| s == name) {
            self.metadata.applied_strategies.push(name.to_owned());
        }
    }

    /// Agent role from metadata, role headers, or a `role=` marker in the
    /// User-Agent.
    pub fn agent_role(&self) -> Option<String> {
        if let Some(role) = &self.metadata.agent_role {
            return Some(role.clone());
        }
        if let Some(role) = self
            .request
            .header(HEADER_AGENT_ROLE)
            .or_else(|| self.request.header(HEADER_AGENT_ROLE_ALT))
        {
            return Some(role.to_owned());
        }
        let user_agent = self.request.header("user-agent").unwrap_or("");
        let lower = user_agent.to_ascii_lowercase();
        if let Some(idx) = lower.find("role=") {
            let rest = &user_agent[idx + "role=".len()..];
            let role = rest.split_whitespace().next().unwrap_or("");
            if !role.is_empty() {
                return Some(role.to_owned());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> FlowRequest {
        FlowRequest::new(Method::POST, url)
    }

    #[test]
    fn test_traffic_type_round_trip() {
        assert_eq!(TrafficType::parse("AGENT_TO_AGENT"), TrafficType::AgentToAgent);
        assert_eq!(TrafficType::parse("tool_call"), TrafficType::ToolCall);
        assert_eq!(TrafficType::parse("bogus"), TrafficType::Unknown);
        assert_eq!(TrafficType::LlmApi.to_string(), "LLM_API");
    }

    #[test]
    fn test_set_text_updates_content_length() {
        let mut req = request("http://localhost:8001/search_flights");
        req.set_text("{\"origin\":\"JFK\"}");
        assert_eq!(req.header("content-length"), Some("16"));
        assert_eq!(req.text().as_deref(), Some("{\"origin\":\"JFK\"}"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut req = request("http://localhost:8001/search_flights");
        req.set_json(&serde_json::json!({"a": 1}));
        assert_eq!(req.json(), Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_response_make_fills_reason() {
        let resp = FlowResponse::make(503, b"{}".to_vec(), &[("Content-Type", "application/json")]);
        assert_eq!(resp.reason, "Service Unavailable");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.header("content-length"), Some("2"));
    }

    #[test]
    fn test_record_applied_deduplicates() {
        let mut flow = Flow::new(request("http://localhost/a"));
        flow.record_applied("delay");
        flow.record_applied("err");
        flow.record_applied("delay");
        assert_eq!(flow.metadata.applied_strategies, vec!["delay", "err"]);
    }

    #[test]
    fn test_agent_role_sources() {
        let mut flow = Flow::new(request("http://localhost/a"));
        assert_eq!(flow.agent_role(), None);

        flow.request.set_header("X-Agent-Role", "QAEngineer");
        assert_eq!(flow.agent_role().as_deref(), Some("QAEngineer"));

        let mut flow = Flow::new(request("http://localhost/a"));
        flow.request.set_header("User-Agent", "autogen/0.2 role=planner build=3");
        assert_eq!(flow.agent_role().as_deref(), Some("planner"));
    }

    #[test]
    fn test_url_accessors() {
        let req = request("https://api.openai.com/v1/chat/completions?x=1");
        assert_eq!(req.host(), "api.openai.com");
        assert_eq!(req.scheme(), "https");
        assert_eq!(req.path(), "/v1/chat/completions");
    }
}
