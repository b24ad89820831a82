//! Structured logging initialization
//!
//! Sets up the tracing subscriber with an environment filter and either plain
//! or JSON console output.

use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON format for structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json_format: false,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns an error if
/// a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_env_filter(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_env_filter(env_filter)
            .try_init()?;
    }

    tracing::info!(
        "Logging initialized: level={}, format={}",
        config.level,
        if config.json_format { "json" } else { "text" }
    );
    Ok(())
}
