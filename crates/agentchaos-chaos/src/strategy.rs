//! Strategy contract and circuit-breaker wrapped execution
//!
//! A strategy answers two questions: does it trigger for a flow
//! (`should_trigger`), and what does it do to the flow (`apply`). The
//! [`StrategyHandle`] wraps every instance with a circuit breaker so repeated
//! failures bypass the strategy for a cool-down instead of degrading traffic.

use agentchaos_config::StrategySpec;
use agentchaos_core::{ChaosError, CircuitBreaker, ErrorCode, Flow};
use agentchaos_observability::record_error_code;
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Compiled target patterns for one strategy.
///
/// URL patterns come from the referenced `http_endpoint` target (projected
/// into `url_pattern`) or an inline pattern; `agent_role` targets project
/// into a role pattern matched against the role headers.
#[derive(Debug, Default)]
pub struct TargetMatcher {
    url_patterns: Vec<Regex>,
    role_pattern: Option<Regex>,
}

impl TargetMatcher {
    pub fn from_spec(spec: &StrategySpec) -> Self {
        let mut url_patterns = Vec::new();
        if let Some(pattern) = spec.param_str("url_pattern") {
            match Regex::new(pattern) {
                Ok(regex) => url_patterns.push(regex),
                Err(e) => warn!("Invalid url_pattern '{pattern}' for '{}': {e}", spec.name),
            }
        }

        let role_pattern = spec.param_str("target_role").and_then(|pattern| {
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Invalid target_role pattern '{pattern}' for '{}': {e}", spec.name);
                    None
                }
            }
        });

        Self {
            url_patterns,
            role_pattern,
        }
    }

    /// No patterns configured: the strategy triggers on every flow.
    pub fn is_empty(&self) -> bool {
        self.url_patterns.is_empty() && self.role_pattern.is_none()
    }

    pub fn matches(&self, flow: &Flow) -> bool {
        let url = &flow.request.url;
        if self.url_patterns.iter().any(|p| p.is_match(url)) {
            return true;
        }
        if let (Some(pattern), Some(role)) = (&self.role_pattern, flow.agent_role()) {
            if pattern.is_match(&role) {
                return true;
            }
        }
        false
    }
}

/// Fields shared by every strategy implementation.
#[derive(Debug)]
pub struct StrategyCommon {
    pub name: String,
    pub enabled: bool,
    pub probability: f64,
    pub matcher: TargetMatcher,
}

impl StrategyCommon {
    pub fn from_spec(spec: &StrategySpec) -> Self {
        Self {
            name: spec.name.clone(),
            enabled: spec.enabled,
            probability: spec.probability,
            matcher: TargetMatcher::from_spec(spec),
        }
    }

    /// Probability gate: uniform draw in [0, 1) must land below the
    /// configured probability. Evaluated once per `apply`.
    pub fn passes_probability(&self) -> bool {
        rand::rng().random::<f64>() < self.probability
    }
}

/// A chaos attack strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn common(&self) -> &StrategyCommon;

    /// Strategy kind tag, as used in plans and metrics labels.
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str {
        &self.common().name
    }

    fn enabled(&self) -> bool {
        self.common().enabled
    }

    /// Whether this strategy applies to the flow: enabled, and either no
    /// patterns are configured or one of them matches.
    fn should_trigger(&self, flow: &Flow) -> bool {
        if !self.enabled() {
            return false;
        }
        let matcher = &self.common().matcher;
        matcher.is_empty() || matcher.matches(flow)
    }

    /// Apply the attack. Returns true when the flow was mutated.
    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError>;

    /// Strategy-specific span attributes recorded on injection.
    fn span_attributes(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// A strategy plus its per-instance circuit breaker.
pub struct StrategyHandle {
    strategy: Arc<dyn Strategy>,
    breaker: CircuitBreaker,
}

impl StrategyHandle {
    pub fn new(strategy: Arc<dyn Strategy>) -> Self {
        let breaker = CircuitBreaker::with_defaults(format!("Strategy-{}", strategy.name()));
        Self { strategy, breaker }
    }

    pub fn name(&self) -> &str {
        self.strategy.name()
    }

    pub fn kind(&self) -> &'static str {
        self.strategy.kind()
    }

    pub fn enabled(&self) -> bool {
        self.strategy.enabled()
    }

    pub fn should_trigger(&self, flow: &Flow) -> bool {
        self.strategy.should_trigger(flow)
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run the strategy through the circuit breaker.
    ///
    /// An open breaker skips the strategy and reports `Ok(false)`. A success
    /// closes a half-open breaker; the failure that trips the breaker records
    /// `STRATEGY_DISABLED` once, and the error is re-raised so the pipeline's
    /// fail-open guard owns the final handling.
    pub async fn intercept(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        if !self.breaker.allow_call() {
            debug!(
                "Strategy '{}': circuit breaker is OPEN, bypassing strategy",
                self.name()
            );
            return Ok(false);
        }

        match self.strategy.apply(flow).await {
            Ok(applied) => {
                self.breaker.record_success();
                if applied {
                    flow.record_applied(self.name());
                }
                Ok(applied)
            }
            Err(e) => {
                if self.breaker.record_failure() {
                    warn!(
                        "[{}] Strategy disabled: '{}' (opened after {} failures, bypassing for {:?})",
                        ErrorCode::StrategyDisabled,
                        self.name(),
                        self.breaker.fail_max(),
                        self.breaker.reset_timeout()
                    );
                    record_error_code(ErrorCode::StrategyDisabled, Some(self.name()));
                }
                Err(e)
            }
        }
    }
}
