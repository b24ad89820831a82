//! Proxy operating modes
//!
//! The mode is fixed per process instance; there are no runtime transitions.

use agentchaos_core::ChaosError;
use std::fmt;
use std::str::FromStr;

/// How the proxy treats upstream traffic and tapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// Strategies + upstream + optional tape
    #[default]
    Live,
    /// Strategies + upstream + mandatory tape write (tape key required)
    Record,
    /// Tape required; strategies bypassed; no network
    Playback,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Live => "LIVE",
            ProxyMode::Record => "RECORD",
            ProxyMode::Playback => "PLAYBACK",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = ChaosError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "LIVE" => Ok(ProxyMode::Live),
            "RECORD" => Ok(ProxyMode::Record),
            "PLAYBACK" => Ok(ProxyMode::Playback),
            other => Err(ChaosError::ConfigInvalid(format!(
                "Invalid mode: {other}. Must be LIVE, RECORD, or PLAYBACK"
            ))),
        }
    }
}
