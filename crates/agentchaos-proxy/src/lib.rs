//! Chaos interception pipeline
//!
//! The proxy process: authenticate control traffic, classify each flow,
//! apply plan-selected strategies in order behind a global fail-open guard,
//! record/replay tapes, emit telemetry and dashboard events, and write the
//! structured proxy log with backpressure.

pub mod logwriter;
pub mod mode;
pub mod pipeline;
pub mod server;
pub mod upstream;

pub use logwriter::StructuredLogWriter;
pub use mode::ProxyMode;
pub use pipeline::{ChaosPipeline, ProxyConfig};
pub use server::ChaosProxy;
pub use upstream::UpstreamClient;
