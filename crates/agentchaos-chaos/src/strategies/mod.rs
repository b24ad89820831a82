//! Built-in chaos strategy catalog

pub mod cognitive;
pub mod data;
pub mod fuzzing;
pub mod group;
pub mod network;
pub mod rag;
pub mod semantic;
pub mod simple_log;
pub mod swarm;

pub use cognitive::{ContextOverflowStrategy, HallucinationStrategy, PromptInjectionStrategy};
pub use data::JsonCorruptionStrategy;
pub use fuzzing::{McpFuzzingStrategy, SchemaAwareFuzzer};
pub use group::{GroupChaosStrategy, GroupFailureStrategy};
pub use network::{ErrorStrategy, LatencyStrategy};
pub use rag::PhantomDocumentStrategy;
pub use semantic::SemanticStrategy;
pub use simple_log::SimpleLogStrategy;
pub use swarm::SwarmDisruptionStrategy;
