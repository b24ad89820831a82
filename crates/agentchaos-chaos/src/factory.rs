//! Strategy factory
//!
//! Maps plan strategy tags to constructors. Third-party strategies register
//! through [`StrategyFactory::register`]; unknown tags are logged and
//! skipped so one bad scenario never takes down the whole plan.

use crate::strategies::{
    ContextOverflowStrategy, ErrorStrategy, GroupChaosStrategy, GroupFailureStrategy,
    HallucinationStrategy, JsonCorruptionStrategy, LatencyStrategy, McpFuzzingStrategy,
    PhantomDocumentStrategy, PromptInjectionStrategy, SemanticStrategy, SimpleLogStrategy,
    SwarmDisruptionStrategy,
};
use crate::strategy::{Strategy, StrategyHandle};
use agentchaos_config::{LegacyConfig, StrategySpec};
use agentchaos_core::ChaosError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Constructor signature for strategy types.
pub type StrategyConstructor = fn(&StrategySpec) -> Result<Arc<dyn Strategy>, ChaosError>;

macro_rules! constructor {
    ($strategy:ident) => {
        |spec: &StrategySpec| -> Result<Arc<dyn Strategy>, ChaosError> {
            Ok(Arc::new($strategy::from_spec(spec)?))
        }
    };
}

/// Factory for creating strategy instances from plan configuration.
pub struct StrategyFactory {
    constructors: HashMap<String, StrategyConstructor>,
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl StrategyFactory {
    /// Factory pre-loaded with the built-in strategy catalog.
    pub fn with_builtins() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };

        factory.register("latency", constructor!(LatencyStrategy));
        factory.register("error", constructor!(ErrorStrategy));
        factory.register("data_corruption", constructor!(JsonCorruptionStrategy));
        factory.register("semantic", constructor!(SemanticStrategy));
        factory.register("mcp_fuzzing", constructor!(McpFuzzingStrategy));
        factory.register("group_chaos", constructor!(GroupChaosStrategy));
        factory.register("group_failure", constructor!(GroupFailureStrategy));
        factory.register("simple_log", constructor!(SimpleLogStrategy));
        factory.register("hallucination", constructor!(HallucinationStrategy));
        factory.register("context_overflow", constructor!(ContextOverflowStrategy));
        factory.register("prompt_injection", constructor!(PromptInjectionStrategy));
        factory.register("phantom_document", constructor!(PhantomDocumentStrategy));
        factory.register("rag_poisoning", constructor!(PhantomDocumentStrategy));
        factory.register("swarm_disruption", constructor!(SwarmDisruptionStrategy));

        factory
    }

    /// Register a strategy type. Later registrations win, so plug-ins may
    /// override built-ins.
    pub fn register(&mut self, strategy_type: impl Into<String>, constructor: StrategyConstructor) {
        let strategy_type = strategy_type.into();
        debug!("Registered strategy type: {strategy_type}");
        self.constructors.insert(strategy_type, constructor);
    }

    /// Create one strategy instance. Unknown types and constructor failures
    /// are logged and yield `None`.
    pub fn create(&self, spec: &StrategySpec) -> Option<StrategyHandle> {
        let Some(constructor) = self.constructors.get(&spec.strategy_type) else {
            error!("Unknown strategy type: {}", spec.strategy_type);
            return None;
        };
        match constructor(spec) {
            Ok(strategy) => Some(StrategyHandle::new(strategy)),
            Err(e) => {
                error!("Failed to create strategy {} ({}): {e}", spec.name, spec.strategy_type);
                None
            }
        }
    }

    /// Build the full strategy list from a plan's legacy projection,
    /// preserving declaration order.
    pub fn build_all(&self, config: &LegacyConfig) -> Vec<StrategyHandle> {
        config.strategies.iter().filter_map(|spec| self.create(spec)).collect()
    }

    pub fn available_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
