//! Minimal logging strategy for debugging proxy setup
//!
//! Never mutates the flow; logs redacted request/response information so a
//! plan can be smoke-tested end to end.

use crate::strategy::{Strategy, StrategyCommon};
use agentchaos_config::StrategySpec;
use agentchaos_core::{ChaosError, Flow};
use agentchaos_security::PiiRedactor;
use async_trait::async_trait;
use tracing::{debug, info};

pub struct SimpleLogStrategy {
    common: StrategyCommon,
    redactor: PiiRedactor,
}

impl SimpleLogStrategy {
    pub fn from_spec(spec: &StrategySpec) -> Result<Self, ChaosError> {
        Ok(Self {
            common: StrategyCommon::from_spec(spec),
            redactor: PiiRedactor::from_env(),
        })
    }
}

#[async_trait]
impl Strategy for SimpleLogStrategy {
    fn common(&self) -> &StrategyCommon {
        &self.common
    }

    fn kind(&self) -> &'static str {
        "simple_log"
    }

    async fn apply(&self, flow: &mut Flow) -> Result<bool, ChaosError> {
        if !self.common.passes_probability() {
            return Ok(false);
        }
        let redacted_url = self.redactor.redact_url(&flow.request.url);
        info!("Intercepted request: {} {redacted_url}", flow.request.method);
        debug!(
            "Request headers: {:?}",
            self.redactor.redact_header_map(&flow.request.headers)
        );

        if let Some(response) = &flow.response {
            info!("Intercepted response: {} for {redacted_url}", response.status_code);
            debug!(
                "Response headers: {:?}",
                self.redactor.redact_header_map(&response.headers)
            );
        }

        Ok(true)
    }
}
