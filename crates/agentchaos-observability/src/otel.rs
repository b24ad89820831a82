//! Trace export configuration
//!
//! Span attributes follow the `chaos.*` / `traffic.*` / `ai.*` vocabulary set
//! by the proxy pipeline; this module only carries the exporter endpoint and
//! sampling configuration.

use tracing::warn;

/// OTLP exporter + sampling configuration.
#[derive(Debug, Clone)]
pub struct OtelConfig {
    /// Service name attached to exported spans
    pub service_name: String,
    /// OTLP gRPC endpoint
    pub otlp_endpoint: String,
    /// Sampling ratio, clamped to [0.0, 1.0]
    pub sample_rate: f64,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            service_name: "chaos-proxy".to_owned(),
            otlp_endpoint: "http://localhost:4317".to_owned(),
            sample_rate: 0.1,
        }
    }
}

impl OtelConfig {
    /// Read `OTEL_EXPORTER_OTLP_ENDPOINT` and `OTEL_SAMPLE_RATE` from the
    /// environment, falling back to defaults.
    pub fn from_env(service_name: &str) -> Self {
        let mut config = Self {
            service_name: service_name.to_owned(),
            ..Self::default()
        };
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            if !endpoint.is_empty() {
                config.otlp_endpoint = endpoint;
            }
        }
        config.sample_rate = sample_rate_from_env();
        config
    }
}

/// Parse `OTEL_SAMPLE_RATE`, defaulting to 0.1 and clamping to [0.0, 1.0].
pub fn sample_rate_from_env() -> f64 {
    let raw = match std::env::var("OTEL_SAMPLE_RATE") {
        Ok(raw) => raw,
        Err(_) => return 0.1,
    };
    let rate: f64 = match raw.parse() {
        Ok(rate) => rate,
        Err(_) => {
            warn!("Invalid OTEL_SAMPLE_RATE='{raw}', defaulting to 0.1");
            return 0.1;
        }
    };
    if !(0.0..=1.0).contains(&rate) {
        warn!("OTEL_SAMPLE_RATE out of range ({rate}), clamping to [0.0, 1.0]");
        return rate.clamp(0.0, 1.0);
    }
    rate
}
