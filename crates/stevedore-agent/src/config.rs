//! Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("invalid agent config: {0}")]
    Invalid(String),
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path of the persisted executions file.
    #[serde(default = "default_executions_file")]
    pub executions_file: PathBuf,

    /// Periodic reconciliation fallback interval. Bounds reconciliation
    /// latency when change notifications are missed.
    #[serde(default = "default_tick_interval")]
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Range dynamic host ports are drawn from.
    #[serde(default)]
    pub ports: PortRange,
}

/// Half-open port range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// Inclusive start of the range.
    #[serde(default = "default_port_start")]
    pub start: u16,

    /// Exclusive end of the range.
    #[serde(default = "default_port_end")]
    pub end: u16,
}

fn default_executions_file() -> PathBuf {
    PathBuf::from("executions.json")
}

const fn default_tick_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_port_start() -> u16 {
    20000
}

const fn default_port_end() -> u16 {
    32768
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executions_file: default_executions_file(),
            tick_interval: default_tick_interval(),
            ports: PortRange::default(),
        }
    }
}

impl AgentConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if the tick interval is zero or the port range is
    /// empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be positive".to_string(),
            ));
        }
        if self.ports.start >= self.ports.end {
            return Err(ConfigError::Invalid(format!(
                "port range {}..{} is empty",
                self.ports.start, self.ports.end
            )));
        }
        Ok(())
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.ports.start, 20000);
        assert_eq!(config.ports.end, 32768);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.executions_file, PathBuf::from("executions.json"));
        assert_eq!(config.tick_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_durations_use_humantime() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"tick_interval": "5s"}"#).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(5));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["tick_interval"], "5s");
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = AgentConfig {
            tick_interval: Duration::ZERO,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_port_range_is_rejected() {
        let config = AgentConfig {
            ports: PortRange {
                start: 30000,
                end: 30000,
            },
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
