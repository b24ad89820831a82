//! Environment-driven proxy settings
//!
//! Strict-mode flags default to on: degraded behavior must be opted into,
//! never silently fallen back to.

use std::path::PathBuf;

/// Settings read once at startup from `CHAOS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Classifier requires rule packs (`CHAOS_CLASSIFIER_STRICT`)
    pub classifier_strict: bool,
    /// Replay masking requires the JSONPath engine (`CHAOS_REPLAY_STRICT`)
    pub replay_strict: bool,
    /// JWT validation must be possible when a secret is set (`CHAOS_JWT_STRICT`)
    pub jwt_strict: bool,
    /// Tape encryption key (`CHAOS_TAPE_KEY`)
    pub tape_key: Option<String>,
    /// Explicit structured log file (`CHAOS_LOG_FILE`)
    pub log_file: Option<PathBuf>,
    /// Log directory when no explicit file is set (`CHAOS_LOG_DIR`)
    pub log_dir: Option<PathBuf>,
    /// Audit log path (`CHAOS_AUDIT_LOG`)
    pub audit_log: PathBuf,
    /// Root of persisted run directories (`CHAOS_RUNS_DIR`)
    pub runs_dir: PathBuf,
    /// Start the dashboard inside the proxy process (`CHAOS_DASHBOARD_AUTOSTART`)
    pub dashboard_autostart: bool,
    /// PII redaction toggle (`PII_REDACTION_ENABLED`)
    pub pii_redaction_enabled: bool,
    /// LLM health-check endpoint (`CHAOS_LLM_HEALTH_URL`)
    pub llm_health_url: Option<String>,
    /// Skip the startup LLM health check (`CHAOS_LLM_HEALTH_SKIP`)
    pub llm_health_skip: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            classifier_strict: true,
            replay_strict: true,
            jwt_strict: true,
            tape_key: None,
            log_file: None,
            log_dir: None,
            audit_log: PathBuf::from("logs/audit.log"),
            runs_dir: PathBuf::from("runs"),
            dashboard_autostart: false,
            pii_redaction_enabled: true,
            llm_health_url: None,
            llm_health_skip: false,
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_flag(&value, default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => default,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            classifier_strict: env_flag("CHAOS_CLASSIFIER_STRICT", true),
            replay_strict: env_flag("CHAOS_REPLAY_STRICT", true),
            jwt_strict: env_flag("CHAOS_JWT_STRICT", true),
            tape_key: env_nonempty("CHAOS_TAPE_KEY"),
            log_file: env_nonempty("CHAOS_LOG_FILE").map(PathBuf::from),
            log_dir: env_nonempty("CHAOS_LOG_DIR").map(PathBuf::from),
            audit_log: env_nonempty("CHAOS_AUDIT_LOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.audit_log),
            runs_dir: env_nonempty("CHAOS_RUNS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.runs_dir),
            dashboard_autostart: env_flag("CHAOS_DASHBOARD_AUTOSTART", false),
            pii_redaction_enabled: env_flag("PII_REDACTION_ENABLED", true),
            llm_health_url: env_nonempty("CHAOS_LLM_HEALTH_URL"),
            llm_health_skip: env_flag("CHAOS_LLM_HEALTH_SKIP", false),
        }
    }

    /// Resolved structured log path: `CHAOS_LOG_FILE`, else
    /// `<CHAOS_LOG_DIR>/proxy.log`, else `logs/proxy.log`.
    pub fn log_file_path(&self) -> PathBuf {
        if let Some(file) = &self.log_file {
            return file.clone();
        }
        let dir = self.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"));
        dir.join("proxy.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_strict() {
        let settings = Settings::default();
        assert!(settings.classifier_strict);
        assert!(settings.replay_strict);
        assert!(settings.jwt_strict);
        assert!(settings.pii_redaction_enabled);
        assert!(!settings.dashboard_autostart);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true", false));
        assert!(parse_flag("TRUE", false));
        assert!(!parse_flag("false", true));
        assert!(parse_flag("weird", true));
        assert!(!parse_flag("weird", false));
    }

    #[test]
    fn test_log_file_path_resolution() {
        let mut settings = Settings::default();
        assert_eq!(settings.log_file_path(), PathBuf::from("logs/proxy.log"));

        settings.log_dir = Some(PathBuf::from("/var/run/chaos"));
        assert_eq!(settings.log_file_path(), PathBuf::from("/var/run/chaos/proxy.log"));

        settings.log_file = Some(PathBuf::from("/tmp/explicit.log"));
        assert_eq!(settings.log_file_path(), PathBuf::from("/tmp/explicit.log"));
    }
}
