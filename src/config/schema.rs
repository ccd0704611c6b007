//! Configuration schema
//!
//! Typed form of the YAML configuration file. Every field has a default, so
//! an empty mapping is a complete configuration. Durations are written as
//! humantime strings (`3s`, `25m 30s`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base URL of the HTTP collaborators.
pub const DEFAULT_API_BASE: &str = "https://hacked.cybersheildhub.org";

/// Default base URL of the session connection.
pub const DEFAULT_WS_BASE: &str = "wss://hacked.cybersheildhub.org";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrillConfig {
    /// Base URL for session creation, matchmaking, leaderboard and coach.
    pub api_base: String,

    /// Base URL for `{ws_base}/ws/session/{id}/{role}`.
    pub ws_base: String,

    /// Timers and limits.
    pub timing: TimingConfig,

    /// Coaching hints.
    pub coach: CoachConfig,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            ws_base: DEFAULT_WS_BASE.to_string(),
            timing: TimingConfig::default(),
            coach: CoachConfig::default(),
        }
    }
}

/// Timers and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Countdown budget when the service does not supply one.
    #[serde(with = "duration_str")]
    pub exercise_duration: Duration,

    /// How long the verdict stays on display before the session ends.
    #[serde(with = "duration_str")]
    pub display_delay: Duration,

    /// Delay before re-opening a lost connection.
    #[serde(with = "duration_str")]
    pub reconnect_backoff: Duration,

    /// Ransomware lock-out before a clicked link is relayed.
    #[serde(with = "duration_str")]
    pub ransomware_lockout: Duration,

    /// Validity window of issued match codes.
    #[serde(with = "duration_str")]
    pub code_ttl: Duration,

    /// Timeout for each collaborator request.
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            exercise_duration: Duration::from_secs(1530),
            display_delay: Duration::from_secs(3),
            reconnect_backoff: Duration::from_secs(3),
            ransomware_lockout: Duration::from_secs(5),
            code_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Coaching hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoachConfig {
    /// Whether coaching requests are sent at all.
    pub enabled: bool,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Serde adapter for humantime duration strings.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mapping_is_default() {
        let config: DrillConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, DrillConfig::default());
        assert_eq!(config.timing.exercise_duration, Duration::from_secs(1530));
        assert!(config.coach.enabled);
    }

    #[test]
    fn test_durations_parse_humantime() {
        let yaml = r"
timing:
  exercise_duration: 10m
  display_delay: 500ms
";
        let config: DrillConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timing.exercise_duration, Duration::from_secs(600));
        assert_eq!(config.timing.display_delay, Duration::from_millis(500));
        assert_eq!(config.timing.reconnect_backoff, Duration::from_secs(3));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_yaml::from_str::<DrillConfig>("timing:\n  countdown: 5s\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = serde_yaml::from_str::<DrillConfig>("timing:\n  code_ttl: soon\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&DrillConfig::default()).unwrap();
        assert!(yaml.contains("exercise_duration: 25m 30s"));
        let back: DrillConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, DrillConfig::default());
    }
}
