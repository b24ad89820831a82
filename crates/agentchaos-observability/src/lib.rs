//! Observability for the chaos proxy
//!
//! Structured logging initialization, the Prometheus metric set for AI
//! traffic and chaos injection, and trace-export configuration.

pub mod logging;
pub mod metrics;
pub mod otel;

pub use logging::{init_logging, LoggingConfig};
pub use metrics::{
    record_ai_request, record_chaos_injection, record_chaos_injection_skipped, record_error_code,
    record_token_usage, record_ttft, registry, ChaosMetrics, CHAOS_METRICS,
};
pub use otel::OtelConfig;
