//! Dashboard event types
//!
//! Pushed to connected WebSocket clients for live visualization of agent
//! traffic and chaos injection. Every event carries an ISO timestamp and the
//! flow's request id.

use serde::{Deserialize, Serialize};

fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Events emitted by the proxy pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// A request was intercepted by the proxy
    RequestStarted {
        timestamp: String,
        request_id: String,
        method: String,
        /// Redacted request URL
        url: String,
        agent_role: Option<String>,
        traffic_type: String,
        traffic_subtype: Option<String>,
    },
    /// Chaos was injected into a request or response
    ChaosInjected {
        timestamp: String,
        request_id: String,
        strategy_name: String,
        /// "request" or "response"
        phase: String,
        details: Option<serde_json::Value>,
    },
    /// A response completed
    ResponseReceived {
        timestamp: String,
        request_id: String,
        status_code: u16,
        success: bool,
        response_size: Option<u64>,
        latency_ms: Option<f64>,
    },
    /// Inter-agent communication observed
    SwarmMessage {
        timestamp: String,
        request_id: String,
        from_agent: Option<String>,
        to_agent: Option<String>,
        message_type: String,
        mutated: bool,
    },
}

impl DashboardEvent {
    pub fn request_started(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        agent_role: Option<String>,
        traffic_type: impl Into<String>,
        traffic_subtype: Option<String>,
    ) -> Self {
        Self::RequestStarted {
            timestamp: now_iso(),
            request_id: request_id.into(),
            method: method.into(),
            url: url.into(),
            agent_role,
            traffic_type: traffic_type.into(),
            traffic_subtype,
        }
    }

    pub fn chaos_injected(
        request_id: impl Into<String>,
        strategy_name: impl Into<String>,
        phase: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self::ChaosInjected {
            timestamp: now_iso(),
            request_id: request_id.into(),
            strategy_name: strategy_name.into(),
            phase: phase.into(),
            details,
        }
    }

    pub fn response_received(
        request_id: impl Into<String>,
        status_code: u16,
        response_size: Option<u64>,
        latency_ms: Option<f64>,
    ) -> Self {
        Self::ResponseReceived {
            timestamp: now_iso(),
            request_id: request_id.into(),
            status_code,
            success: status_code < 400,
            response_size,
            latency_ms,
        }
    }

    pub fn swarm_message(
        request_id: impl Into<String>,
        from_agent: Option<String>,
        to_agent: Option<String>,
        message_type: impl Into<String>,
        mutated: bool,
    ) -> Self {
        Self::SwarmMessage {
            timestamp: now_iso(),
            request_id: request_id.into(),
            from_agent,
            to_agent,
            message_type: message_type.into(),
            mutated,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            DashboardEvent::RequestStarted { request_id, .. }
            | DashboardEvent::ChaosInjected { request_id, .. }
            | DashboardEvent::ResponseReceived { request_id, .. }
            | DashboardEvent::SwarmMessage { request_id, .. } => request_id,
        }
    }
}
