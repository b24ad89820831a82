//! Network layer attacks: latency injection and HTTP error injection

use crate::strategy::{Strategy, StrategyCommon};
use agentchaos_config::StrategySpec;
use agentchaos_core::{canonical_reason, ChaosError, Flow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Injects latency before the request is sent upstream.
pub struct LatencyStrategy {
    common: StrategyCommon,
    delay: f64,
}

impl LatencyStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            delay: spec.param_f64("delay").unwrap_or(5.0),
        })
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }
}

#[async_trait]
impl Strategy for LatencyStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "latency"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        // Delay applies before the upstream send only.
        if flow.response.is_some() {
            return Ok(false);
        }
        if !self.common.passes_probability() {
            return Ok(false);
        }

        info!("Injecting latency of {}s for {}", self.delay, flow.request.path());
        tokio::time::sleep(Duration::from_secs_f64(self.delay)).await;
        Ok(true)
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        vec![("chaos.latency_delay", self.delay.to_string())]
    }
}

fn stock_reason(error_code: u16) -> &'static str {
    match error_code {
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        429 => "Too Many Requests",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Chaos Injection",
    }
}

/// Replaces the upstream response with a simulated server error.
pub struct ErrorStrategy {
    common: StrategyCommon,
    error_code: u16,
}

impl ErrorStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            error_code: spec.param_u64("error_code").unwrap_or(500) as u16,
        })
    }

    pub fn error_code(&self) -> u16 {
        self.error_code
    }
}

#[async_trait]
impl Strategy for ErrorStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "error"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        // Errors replace an existing response; response phase only.
        let Some(response) = flow.response.as_mut() else {
            return Ok(false);
        };
        if !self.common.passes_probability() {
            return Ok(false);
        }

        info!("Injecting error {} for {}", self.error_code, flow.request.path());

        response.status_code = self.error_code;
        response.reason = stock_reason(self.error_code).to_owned();
        response.set_json(&serde_json::json!({
            "error": "Chaos injection: Simulated server error",
            "code": self.error_code,
            "type": "chaos_engineering",
        }));
        response.set_header("Content-Type", "application/json");
        Ok(true)
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        vec![("chaos.error_code", self.error_code.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchaos_core::{FlowRequest, FlowResponse};
    use http::Method;
    use serde_json::json;
    use std::time::Instant;

    fn spec(strategy_type: &str, params: serde_json::Value) -> StrategySpec {
        serde_json::from_value(json!({
            "name": "s",
            "type": strategy_type,
            "params": params,
        }))
        .unwrap()
    }

    fn request_flow() -> Flow {
        Flow::new(FlowRequest::new(Method::POST, "http://localhost:8001/search_flights"))
    }

    fn response_flow() -> Flow {
        let mut flow = request_flow();
        flow.response = Some(FlowResponse::make(
            200,
            br#"{"flights":[]}"#.to_vec(),
            &[("Content-Type", "application/json")],
        ));
        flow
    }

    #[tokio::test]
    async fn test_latency_sleeps_for_configured_delay() {
        let strategy = LatencyStrategy::from_spec(&spec("latency", json!({"delay": 0.1}))).unwrap();
        let mut flow = request_flow();

        let start = Instant::now();
        assert!(strategy.apply(&mut flow).await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_latency_skips_response_phase() {
        let strategy = LatencyStrategy::from_spec(&spec("latency", json!({"delay": 5.0}))).unwrap();
        let mut flow = response_flow();
        assert!(!strategy.apply(&mut flow).await.unwrap());
    }

    #[tokio::test]
    async fn test_latency_zero_probability_never_applies() {
        let s: StrategySpec = serde_json::from_value(json!({
            "name": "s", "type": "latency", "probability": 0.0,
            "params": {"delay": 5.0},
        }))
        .unwrap();
        let strategy = LatencyStrategy::from_spec(&s).unwrap();
        let mut flow = request_flow();
        assert!(!strategy.apply(&mut flow).await.unwrap());
    }

    #[tokio::test]
    async fn test_error_replaces_response() {
        let strategy = ErrorStrategy::from_spec(&spec("error", json!({"error_code": 503}))).unwrap();
        let mut flow = response_flow();
        assert!(strategy.apply(&mut flow).await.unwrap());

        let response = flow.response.as_ref().unwrap();
        assert_eq!(response.status_code, 503);
        assert_eq!(response.reason, "Service Unavailable");
        assert_eq!(response.header("content-type"), Some("application/json"));

        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "Chaos injection: Simulated server error");
        assert_eq!(body["code"], 503);
        assert_eq!(body["type"], "chaos_engineering");
    }

    #[tokio::test]
    async fn test_error_skips_request_phase() {
        let strategy = ErrorStrategy::from_spec(&spec("error", json!({}))).unwrap();
        let mut flow = request_flow();
        assert!(!strategy.apply(&mut flow).await.unwrap());
    }

    #[test]
    fn test_stock_reasons() {
        assert_eq!(stock_reason(500), "Internal Server Error");
        assert_eq!(stock_reason(429), "Too Many Requests");
        assert_eq!(stock_reason(502), "Bad Gateway");
        assert_eq!(stock_reason(504), "Gateway Timeout");
        assert_eq!(stock_reason(418), "Chaos Injection");
    }

    #[test]
    fn test_canonical_reason_available_for_synthesized_responses() {
        assert_eq!(canonical_reason(404), "Not Found");
    }
}
