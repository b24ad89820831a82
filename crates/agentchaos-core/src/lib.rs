//! AgentChaos core types
//!
//! Provides the flow model shared by the interception pipeline and the
//! strategy engine, the structured error taxonomy, and the circuit breaker
//! used for fail-open behavior.

pub mod error;
pub mod flow;
pub mod resilience;

pub use error::{ChaosError, ErrorCode};
pub use flow::{
    canonical_reason, Flow, FlowMetadata, FlowRequest, FlowResponse, Phase, TrafficType,
    HEADER_AGENT_ROLE, HEADER_AGENT_ROLE_ALT, HEADER_CHAOS_SUBTYPE, HEADER_CHAOS_TYPE,
};
pub use resilience::{CircuitBreaker, CircuitState};

pub type Result<T> = std::result::Result<T, ChaosError>;
