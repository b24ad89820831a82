//! Prometheus metrics for AI traffic and chaos injection
//!
//! Labels are deliberately low-cardinality: the model name and strategy
//! identifiers only. Agent roles never become label values.

use agentchaos_core::ErrorCode;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, Registry,
};

/// TTFT bucket boundaries in seconds.
pub const TTFT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Chaos proxy metric set.
pub struct ChaosMetrics {
    /// Total AI requests seen by the proxy
    pub ai_requests_total: CounterVec,

    /// Estimated token usage, split by prompt/completion
    pub ai_token_usage: CounterVec,

    /// Time to first token in seconds
    pub ai_latency_ttft: HistogramVec,

    /// Chaos injections by strategy
    pub ai_chaos_injections: CounterVec,

    /// Injections that were skipped, by reason
    pub chaos_injection_skipped_total: CounterVec,

    /// Structured error codes
    pub chaos_error_codes_total: CounterVec,
}

impl ChaosMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            ai_requests_total: register_counter_vec!(
                "ai_requests_total",
                "Total number of AI requests",
                &["model"]
            )?,

            ai_token_usage: register_counter_vec!(
                "ai_token_usage",
                "Total token usage (estimated)",
                &["model", "type"]
            )?,

            ai_latency_ttft: register_histogram_vec!(
                "ai_latency_ttft",
                "Time to first token (TTFT) in seconds",
                &["model"],
                TTFT_BUCKETS.to_vec()
            )?,

            ai_chaos_injections: register_counter_vec!(
                "ai_chaos_injections",
                "Total number of chaos injections",
                &["strategy", "model"]
            )?,

            chaos_injection_skipped_total: register_counter_vec!(
                "chaos_injection_skipped_total",
                "Total number of skipped chaos injections",
                &["strategy_type", "reason"]
            )?,

            chaos_error_codes_total: register_counter_vec!(
                "chaos_error_codes_total",
                "Total number of chaos errors by code",
                &["error_code", "strategy"]
            )?,
        })
    }
}

impl Default for ChaosMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create chaos metrics")
    }
}

/// Global metrics instance
pub static CHAOS_METRICS: Lazy<ChaosMetrics> =
    Lazy::new(|| ChaosMetrics::new().expect("Failed to initialize chaos metrics"));

/// Get the default Prometheus registry
pub fn registry() -> &'static Registry {
    prometheus::default_registry()
}

/// Record an AI request.
pub fn record_ai_request(model: &str) {
    CHAOS_METRICS.ai_requests_total.with_label_values(&[model]).inc();
}

/// Record estimated token usage. `token_type` is "prompt" or "completion".
pub fn record_token_usage(tokens: u64, model: &str, token_type: &str) {
    CHAOS_METRICS
        .ai_token_usage
        .with_label_values(&[model, token_type])
        .inc_by(tokens as f64);
}

/// Record time to first token in seconds.
pub fn record_ttft(seconds: f64, model: &str) {
    CHAOS_METRICS.ai_latency_ttft.with_label_values(&[model]).observe(seconds);
}

/// Record a chaos injection event.
pub fn record_chaos_injection(strategy: &str, model: &str) {
    CHAOS_METRICS
        .ai_chaos_injections
        .with_label_values(&[strategy, model])
        .inc();
}

/// Record a skipped chaos injection (e.g. `rag` / `jsonpath_miss`).
pub fn record_chaos_injection_skipped(strategy_type: &str, reason: &str) {
    CHAOS_METRICS
        .chaos_injection_skipped_total
        .with_label_values(&[strategy_type, reason])
        .inc();
}

/// Record a structured error code.
pub fn record_error_code(error_code: ErrorCode, strategy: Option<&str>) {
    CHAOS_METRICS
        .chaos_error_codes_total
        .with_label_values(&[error_code.as_str(), strategy.unwrap_or("")])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        // The global CHAOS_METRICS is already initialized, proving that metric
        // registration works. Creating a second instance would fail with
        // "AlreadyReg", so verify the global instance is accessible instead.
        let _metrics = &*CHAOS_METRICS;
    }

    #[test]
    fn test_record_ai_request() {
        let counter = CHAOS_METRICS.ai_requests_total.clone();
        let before = counter.with_label_values(&["llama3.2"]).get();
        record_ai_request("llama3.2");
        let after = counter.with_label_values(&["llama3.2"]).get();
        assert!(after > before);
    }

    #[test]
    fn test_record_token_usage_by_type() {
        let counter = CHAOS_METRICS.ai_token_usage.clone();
        let before = counter.with_label_values(&["m", "prompt"]).get();
        record_token_usage(42, "m", "prompt");
        let after = counter.with_label_values(&["m", "prompt"]).get();
        assert!((after - before - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_ttft() {
        record_ttft(0.12, "m");
        // Just ensure it doesn't panic
    }

    #[test]
    fn test_record_error_code_with_and_without_strategy() {
        let counter = CHAOS_METRICS.chaos_error_codes_total.clone();
        let before = counter
            .with_label_values(&["STRATEGY_DISABLED", "delay"])
            .get();
        record_error_code(ErrorCode::StrategyDisabled, Some("delay"));
        let after = counter
            .with_label_values(&["STRATEGY_DISABLED", "delay"])
            .get();
        assert!(after > before);

        record_error_code(ErrorCode::ConfigInvalid, None);
        assert!(counter.with_label_values(&["CONFIG_INVALID", ""]).get() >= 1.0);
    }
}
