//! Group-based chaos: attacks keyed on agent role
//!
//! One rule affects every agent carrying the target role, which makes it
//! possible to take out an entire organizational function (all QA engineers,
//! all planners) with a single scenario.

use crate::strategy::{Strategy, StrategyCommon};
use agentchaos_config::StrategySpec;
use agentchaos_core::{ChaosError, Flow, FlowResponse};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Role-gated chaos with a configurable action: `latency`, `error`, or
/// `disable`.
pub struct GroupChaosStrategy {
    common: StrategyCommon,
    target_role: String,
    action: String,
    delay: f64,
    error_code: u16,
}

impl GroupChaosStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        let target_role = spec
            .param_str("target_role")
            .map(str::to_owned)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                ChaosError::ConfigInvalid(format!("'{}': target_role is required", spec.name))
            })?;

        let action = spec.param_str("action").unwrap_or("latency").to_owned();
        if !matches!(action.as_str(), "latency" | "error" | "disable") {
            return Err(ChaosError::ConfigInvalid(format!(
                "'{}': action must be one of latency/error/disable, got {action}",
                spec.name
            )));
        }

        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            target_role,
            action,
            delay: spec.param_f64("delay").unwrap_or(1.0),
            error_code: spec.param_u64("error_code").unwrap_or(500) as u16,
        })
    }

    pub fn target_role(&self) -> &str {
        &self.target_role
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

#[async_trait]
impl Strategy for GroupChaosStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "group_chaos"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        let Some(role) = flow.agent_role() else {
            return Ok(false);
        };
        if role != self.target_role {
            return Ok(false);
        }
        if !self.common.passes_probability() {
            return Ok(false);
        }

        info!(
            "Group chaos applied: role={role}, action={}, target={}",
            self.action,
            flow.request.path()
        );

        match self.action.as_str() {
            "latency" => {
                debug!("Applying latency: {}s to role {role}", self.delay);
                tokio::time::sleep(Duration::from_secs_f64(self.delay)).await;
                Ok(true)
            }
            "error" => {
                match flow.response.as_mut() {
                    Some(response) => {
                        response.status_code = self.error_code;
                        response.set_text("Chaos Injection: Group-based error");
                    }
                    None => {
                        flow.response = Some(FlowResponse::make(
                            self.error_code,
                            b"Chaos Injection: Group-based error".to_vec(),
                            &[("Content-Type", "text/plain")],
                        ));
                    }
                }
                Ok(true)
            }
            "disable" => {
                flow.response = Some(FlowResponse::make(
                    503,
                    b"Service Unavailable: Group disabled by chaos strategy".to_vec(),
                    &[("Content-Type", "text/plain"), ("Retry-After", "60")],
                ));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![
            ("chaos.target_role", self.target_role.clone()),
            ("chaos.group_action", self.action.clone()),
        ];
        match self.action.as_str() {
            "latency" => attributes.push(("chaos.delay", self.delay.to_string())),
            "error" => attributes.push(("chaos.error_code", self.error_code.to_string())),
            _ => {}
        }
        attributes
    }
}

/// Simulates an entire organizational function going down: every flow from
/// the target role gets an unconditional 503.
pub struct GroupFailureStrategy {
    common: StrategyCommon,
    target_role: String,
}

impl GroupFailureStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        let target_role = spec
            .param_str("target_role")
            .map(str::to_owned)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                ChaosError::ConfigInvalid(format!("'{}': target_role is required", spec.name))
            })?;
        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            target_role,
        })
    }
}

#[async_trait]
impl Strategy for GroupFailureStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "group_failure"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        let Some(role) = flow.agent_role() else {
            return Ok(false);
        };
        if role != self.target_role {
            return Ok(false);
        }
        if !self.common.passes_probability() {
            return Ok(false);
        }

        let reason = format!("Group failure: {}", self.target_role);
        flow.response = Some(FlowResponse::make(
            503,
            format!("Service Unavailable: Group failure - {}", self.target_role).into_bytes(),
            &[
                ("Content-Type", "text/plain"),
                ("Retry-After", "300"),
                ("X-Chaos-Reason", &reason),
            ],
        ));

        warn!(
            "Group failure applied: {} is disabled (request to {})",
            self.target_role,
            flow.request.path()
        );
        Ok(true)
    }

    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("chaos.target_role", self.target_role.clone()),
            ("chaos.group_failure", "true".to_owned()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchaos_core::FlowRequest;
    use http::Method;
    use serde_json::json;

    fn spec(strategy_type: &str, params: serde_json::Value) -> StrategySpec {
        serde_json::from_value(json!({"name": "g", "type": strategy_type, "params": params})).unwrap()
    }

    fn role_flow(role: &str) -> Flow {
        let mut flow = Flow::new(FlowRequest::new(Method::POST, "http://tools.internal/run"));
        flow.request.set_header("X-Agent-Role", role);
        flow
    }

    #[test]
    fn test_target_role_is_required() {
        assert!(GroupChaosStrategy::from_spec(&spec("group_chaos", json!({}))).is_err());
        assert!(GroupFailureStrategy::from_spec(&spec("group_failure", json!({}))).is_err());
    }

    #[test]
    fn test_invalid_action_rejected() {
        let result = GroupChaosStrategy::from_spec(&spec(
            "group_chaos",
            json!({"target_role": "QA", "action": "explode"}),
        ));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_role_mismatch_is_skipped() {
        let strategy = GroupChaosStrategy::from_spec(&spec(
            "group_chaos",
            json!({"target_role": "QAEngineer", "action": "disable"}),
        ))
        .unwrap();
        let mut flow = role_flow("PythonDeveloper");
        assert!(!strategy.apply(&mut flow).await.unwrap());
        assert!(flow.response.is_none());
    }

    #[tokio::test]
    async fn test_disable_returns_503_with_retry_after() {
        let strategy = GroupChaosStrategy::from_spec(&spec(
            "group_chaos",
            json!({"target_role": "QAEngineer", "action": "disable"}),
        ))
        .unwrap();
        let mut flow = role_flow("QAEngineer");
        assert!(strategy.apply(&mut flow).await.unwrap());

        let response = flow.response.as_ref().unwrap();
        assert_eq!(response.status_code, 503);
        assert_eq!(response.header("retry-after"), Some("60"));
    }

    #[tokio::test]
    async fn test_error_action_modifies_existing_response() {
        let strategy = GroupChaosStrategy::from_spec(&spec(
            "group_chaos",
            json!({"target_role": "QAEngineer", "action": "error", "error_code": 502}),
        ))
        .unwrap();
        let mut flow = role_flow("QAEngineer");
        flow.response = Some(FlowResponse::make(200, b"ok".to_vec(), &[]));
        assert!(strategy.apply(&mut flow).await.unwrap());
        assert_eq!(flow.response.as_ref().unwrap().status_code, 502);
    }

    #[tokio::test]
    async fn test_latency_action_sleeps() {
        let strategy = GroupChaosStrategy::from_spec(&spec(
            "group_chaos",
            json!({"target_role": "QAEngineer", "action": "latency", "delay": 0.05}),
        ))
        .unwrap();
        let mut flow = role_flow("QAEngineer");
        let start = std::time::Instant::now();
        assert!(strategy.apply(&mut flow).await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_group_failure_headers() {
        let strategy = GroupFailureStrategy::from_spec(&spec(
            "group_failure",
            json!({"target_role": "QAEngineer"}),
        ))
        .unwrap();
        let mut flow = role_flow("QAEngineer");
        assert!(strategy.apply(&mut flow).await.unwrap());

        let response = flow.response.as_ref().unwrap();
        assert_eq!(response.status_code, 503);
        assert_eq!(response.header("retry-after"), Some("300"));
        assert_eq!(response.header("x-chaos-reason"), Some("Group failure: QAEngineer"));
    }

    #[tokio::test]
    async fn test_group_failure_ignores_other_roles() {
        let strategy = GroupFailureStrategy::from_spec(&spec(
            "group_failure",
            json!({"target_role": "QAEngineer"}),
        ))
        .unwrap();
        let mut flow = role_flow("Planner");
        assert!(!strategy.apply(&mut flow).await.unwrap());
    }
}
