use std::time::Duration;

use serde::{Deserialize, Serialize};

use qx_types::portfolio::RiskLimits;

use crate::paper::PaperBrokerConfig;

/// Event bus sizing (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub max_queue_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { max_queue_size: 10_000 }
    }
}

/// Per-request spacing applied by [`crate::rate_limited::RateLimitedBroker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerRateLimitConfig {
    pub min_request_interval_ms: u64,
}

impl Default for BrokerRateLimitConfig {
    fn default() -> Self {
        Self { min_request_interval_ms: 100 }
    }
}

/// Engine-level intervals and recovery knobs (spec.md §6), with the exact
/// defaults named there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub risk_limits: RiskLimits,
    pub event_bus: EventBusConfig,
    pub paper_broker: PaperBrokerConfig,
    pub broker_rate_limit: BrokerRateLimitConfig,
    pub position_sync_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
    pub dry_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            risk_limits: RiskLimits::default(),
            event_bus: EventBusConfig::default(),
            paper_broker: PaperBrokerConfig::default(),
            broker_rate_limit: BrokerRateLimitConfig::default(),
            position_sync_interval_secs: 60,
            heartbeat_interval_secs: 10,
            max_reconnect_attempts: 5,
            reconnect_delay_secs: 5,
            dry_run: false,
        }
    }
}

impl EngineSettings {
    pub fn position_sync_interval(&self) -> Duration {
        Duration::from_secs(self.position_sync_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Load settings from a TOML file, falling back to defaults for any
    /// field the file omits. No environment-variable layer is implemented
    /// here beyond what the caller chooses to splice in before/after loading
    /// — this keeps the surface area matching spec.md's "layered file +
    /// override" description without inventing an env-var naming scheme the
    /// spec never names.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.position_sync_interval_secs, 60);
        assert_eq!(settings.heartbeat_interval_secs, 10);
        assert_eq!(settings.max_reconnect_attempts, 5);
        assert_eq!(settings.reconnect_delay_secs, 5);
        assert!(!settings.dry_run);
        assert_eq!(settings.event_bus.max_queue_size, 10_000);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let settings = EngineSettings::from_toml_str("dry_run = true\n").unwrap();
        assert!(settings.dry_run);
        assert_eq!(settings.heartbeat_interval_secs, 10);
    }
}
