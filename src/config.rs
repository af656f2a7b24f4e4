//! Configuration management for evbridge
//!
//! This module handles loading, validation, and management of the gateway
//! configuration from YAML files. Every section falls back to its defaults so
//! a partial file is enough to get started.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

mod defaults;

/// Upper bound for any refresh period, thirty days
pub const MAX_INTERVAL_SECONDS: u64 = 30 * 86_400;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Publish/subscribe topic layout
    pub mqtt: MqttConfig,

    /// Vendor account the vehicles belong to
    pub account: AccountConfig,

    /// Per-vehicle refresh scheduling
    pub refresh: RefreshConfig,

    /// Login backoff shared by all vehicles of the account
    pub relogin: ReloginConfig,

    /// Telemetry reconciliation rules
    pub reconcile: ReconcileConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Where per-vehicle refresh settings are kept across restarts
    pub persistence_file: Option<String>,

    /// JSON file describing charging stations that report charge state
    pub charging_stations_file: Option<String>,
}

/// Topic layout and publish behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Root of every topic the gateway publishes or listens to
    pub topic_root: String,

    /// Interval between liveness messages
    pub keepalive_interval_seconds: u64,

    /// Mask identifiers and locations inside JSON payloads
    pub anonymized_publishing: bool,
}

/// Vendor account settings (credentials live with the authenticator)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Account user name; second component of every topic
    pub username: String,
}

/// Refresh scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Interval while the vehicle is driving
    pub active_interval_seconds: u64,

    /// Interval while the vehicle is idle; also the initial interval
    pub inactive_interval_seconds: u64,

    /// Interval while the vehicle is charging
    pub charging_interval_seconds: u64,

    /// Smallest interval accepted from inbound commands
    pub min_interval_seconds: u64,

    /// Interval between refreshes while in FORCE mode
    pub force_interval_seconds: u64,

    /// Successful refreshes after which FORCE falls back to PERIODIC
    pub force_max_refreshes: u32,

    /// Longest time FORCE mode may stay active
    pub force_max_duration_seconds: u64,

    /// Ceiling of the transient-failure backoff
    pub max_backoff_seconds: u64,

    /// Timeout applied to every vendor call
    pub request_timeout_seconds: u64,
}

/// Login backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloginConfig {
    /// Lock duration after the first failed login
    pub initial_delay_seconds: u64,

    /// Ceiling of the lock duration
    pub max_delay_seconds: u64,

    /// Tokens expiring within this margin are treated as expired
    pub expiry_margin_seconds: u64,

    /// A login that has not answered after this long counts as failed
    pub login_timeout_seconds: u64,
}

/// How electric range is chosen when both sources are valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RangePrecedence {
    /// Battery management system value wins
    #[default]
    BmsPreferred,
    /// Larger of the two values wins
    Maximum,
}

/// Exclusive bounds of a raw field value; values at or outside are sentinels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelRange {
    pub min: i64,
    pub max: i64,
}

impl SentinelRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Whether the raw value lies strictly inside the bounds
    pub fn contains(&self, raw: i64) -> bool {
        raw > self.min && raw < self.max
    }
}

/// Reconciliation rules
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Electric range precedence
    pub range_precedence: RangePrecedence,

    /// Sentinel bounds overriding the built-in table, keyed by field name
    pub sentinels: BTreeMap<String, SentinelRange>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (or directory)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "evbridge.yaml",
            "/data/evbridge.yaml",
            "/etc/evbridge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                let config = Self::from_file(path)?;
                config.validate()?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let root = self.mqtt.topic_root.trim();
        if root.is_empty() {
            return Err(BridgeError::validation(
                "mqtt.topic_root",
                "Topic root cannot be empty",
            ));
        }
        if root.contains(['+', '#']) {
            return Err(BridgeError::validation(
                "mqtt.topic_root",
                "Topic root cannot contain wildcards",
            ));
        }
        if self.mqtt.keepalive_interval_seconds == 0 {
            return Err(BridgeError::validation(
                "mqtt.keepalive_interval_seconds",
                "Must be greater than 0",
            ));
        }

        let refresh = &self.refresh;
        if refresh.min_interval_seconds == 0 {
            return Err(BridgeError::validation(
                "refresh.min_interval_seconds",
                "Must be greater than 0",
            ));
        }
        for (field, value) in [
            ("refresh.active_interval_seconds", refresh.active_interval_seconds),
            ("refresh.inactive_interval_seconds", refresh.inactive_interval_seconds),
            ("refresh.charging_interval_seconds", refresh.charging_interval_seconds),
            ("refresh.force_interval_seconds", refresh.force_interval_seconds),
        ] {
            if value < refresh.min_interval_seconds {
                return Err(BridgeError::validation(
                    field.to_string(),
                    format!(
                        "Must be at least refresh.min_interval_seconds ({})",
                        refresh.min_interval_seconds
                    ),
                ));
            }
            if value > MAX_INTERVAL_SECONDS {
                return Err(BridgeError::validation(
                    field.to_string(),
                    format!("Must be at most {}", MAX_INTERVAL_SECONDS),
                ));
            }
        }
        if refresh.force_max_refreshes == 0 {
            return Err(BridgeError::validation(
                "refresh.force_max_refreshes",
                "Must be greater than 0",
            ));
        }
        if refresh.max_backoff_seconds < refresh.min_interval_seconds {
            return Err(BridgeError::validation(
                "refresh.max_backoff_seconds",
                "Must be at least refresh.min_interval_seconds",
            ));
        }
        if refresh.request_timeout_seconds == 0 {
            return Err(BridgeError::validation(
                "refresh.request_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.relogin.initial_delay_seconds == 0 {
            return Err(BridgeError::validation(
                "relogin.initial_delay_seconds",
                "Must be greater than 0",
            ));
        }
        if self.relogin.max_delay_seconds < self.relogin.initial_delay_seconds {
            return Err(BridgeError::validation(
                "relogin.max_delay_seconds",
                "Must be at least relogin.initial_delay_seconds",
            ));
        }
        if self.relogin.login_timeout_seconds == 0 {
            return Err(BridgeError::validation(
                "relogin.login_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        for (name, range) in &self.reconcile.sentinels {
            if range.min >= range.max {
                return Err(BridgeError::validation(
                    format!("reconcile.sentinels.{}", name),
                    "min must be lower than max".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt.topic_root, "saic");
        assert_eq!(config.refresh.force_max_refreshes, 1);
        assert_eq!(
            config.reconcile.range_precedence,
            RangePrecedence::BmsPreferred
        );
        assert!(config.persistence_file.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.mqtt.topic_root = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.mqtt.topic_root = "saic/#".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.refresh.active_interval_seconds = config.refresh.min_interval_seconds - 1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.refresh.inactive_interval_seconds = MAX_INTERVAL_SECONDS + 1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.relogin.login_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "mqtt:\n  topic_root: cars\nreconcile:\n  range_precedence: maximum\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mqtt.topic_root, "cars");
        assert_eq!(config.reconcile.range_precedence, RangePrecedence::Maximum);
        assert_eq!(
            config.refresh.min_interval_seconds,
            RefreshConfig::default().min_interval_seconds
        );
    }

    #[test]
    fn test_sentinel_range_is_exclusive() {
        let range = SentinelRange::new(0, 65535);
        assert!(!range.contains(0));
        assert!(range.contains(1));
        assert!(range.contains(65534));
        assert!(!range.contains(65535));
    }
}
