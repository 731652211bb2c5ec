//! Configuration system for the MQTT logger service
//!
//! Configuration is read once at startup from a TOML file and merged over
//! built-in defaults. The resulting [`LoggerConfig`] is immutable; the
//! transport, subscription and reconnection components receive derived
//! values ([`BrokerEndpoint`], [`SubscriptionSpec`], [`ReconnectConfig`]).

use crate::transport::mqtt::connection::MQTT_MAX_PACKET_SIZE;
use crate::transport::mqtt::{BrokerEndpoint, Credentials, ReconnectConfig, SubscriptionSpec};
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Smallest keepalive interval accepted by the MQTT client
pub const MIN_KEEPALIVE_SECS: u64 = 5;

/// Default file names tried when no `--config` flag is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["config.toml", "/etc/mqtt-logger/config.toml"];

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggerConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Broker connection and subscription settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttSection {
    /// Broker host name or address
    pub broker: String,
    /// Broker TCP port
    pub port: u16,
    /// Topic filter to subscribe to (wildcards allowed)
    pub topic: String,
    /// Requested subscription QoS (0, 1 or 2)
    pub qos: u8,
    /// MQTT client identifier
    pub client_id: String,
    /// Username, used only together with `password`
    pub username: String,
    /// Password, used only together with `username`
    pub password: String,
    /// Keepalive interval in seconds (at least 5)
    pub keepalive_secs: u64,
    /// Upper bound for a single connect attempt, in seconds
    pub connect_timeout_secs: u64,
    /// Largest inbound packet accepted, in bytes
    pub max_packet_bytes: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            topic: "iot/+/status".to_string(),
            qos: 0,
            client_id: "mqtt-logger-service".to_string(),
            username: String::new(),
            password: String::new(),
            keepalive_secs: 60,
            connect_timeout_secs: 10,
            max_packet_bytes: MQTT_MAX_PACKET_SIZE,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory holding the log file and its backups
    pub log_dir: PathBuf,
    /// Log file name inside `log_dir`
    pub log_file: String,
    /// Minimum level: ERROR, WARN/WARNING, INFO, DEBUG or TRACE
    pub log_level: String,
    /// Rotate once the file would reach this size (0 disables rotation)
    pub max_bytes: u64,
    /// Number of rotated backups to keep
    pub backup_count: u32,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log/mqtt-logger"),
            log_file: "mqtt-messages.log".to_string(),
            log_level: "INFO".to_string(),
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}

impl LoggingSection {
    /// Full path of the active log file
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    /// Retry the first time without any delay
    pub immediate_first_retry: bool,
    /// First non-zero backoff delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.0 to 1.0)
    pub jitter: f64,
    /// Uptime in milliseconds after which a dropped link restarts the backoff
    pub stable_after_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            immediate_first_retry: true,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.25,
            stable_after_ms: 10_000,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render configuration: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LoggerConfig {
    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LoggerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the first existing file among `candidates`, falling back to defaults
    ///
    /// Returns the path that was used, if any.
    pub fn load_first_existing(
        candidates: &[&str],
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                let config = Self::load_from_file(&path)?;
                return Ok((config, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.broker.trim().is_empty() {
            return Err(invalid("mqtt.broker must not be empty"));
        }
        if mqtt.port == 0 {
            return Err(invalid("mqtt.port must be between 1 and 65535"));
        }
        if mqtt.client_id.is_empty() {
            return Err(invalid("mqtt.client_id must not be empty"));
        }
        if mqtt.keepalive_secs < MIN_KEEPALIVE_SECS {
            return Err(invalid(&format!(
                "mqtt.keepalive_secs must be at least {MIN_KEEPALIVE_SECS}"
            )));
        }
        if mqtt.connect_timeout_secs == 0 {
            return Err(invalid("mqtt.connect_timeout_secs must be at least 1"));
        }
        if mqtt.max_packet_bytes == 0 || mqtt.max_packet_bytes > MQTT_MAX_PACKET_SIZE {
            return Err(invalid(&format!(
                "mqtt.max_packet_bytes must be between 1 and {MQTT_MAX_PACKET_SIZE}"
            )));
        }
        qos_from_u8(mqtt.qos)?;
        validate_topic_filter(&mqtt.topic)?;
        if mqtt.username.is_empty() != mqtt.password.is_empty() {
            return Err(invalid(
                "mqtt.username and mqtt.password must be set together or not at all",
            ));
        }

        if parse_log_level(&self.logging.log_level).is_none() {
            return Err(invalid(&format!(
                "logging.log_level '{}' is not one of ERROR, WARNING, INFO, DEBUG, TRACE",
                self.logging.log_level
            )));
        }
        if self.logging.log_file.is_empty() {
            return Err(invalid("logging.log_file must not be empty"));
        }

        let reconnect = &self.reconnect;
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(invalid("reconnect.jitter must be between 0.0 and 1.0"));
        }
        if reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier must be at least 1.0"));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(invalid(
                "reconnect.initial_delay_ms must not exceed reconnect.max_delay_ms",
            ));
        }

        Ok(())
    }

    /// Immutable broker endpoint for the transport session
    pub fn broker_endpoint(&self) -> BrokerEndpoint {
        let credentials = if self.mqtt.username.is_empty() {
            None
        } else {
            Some(Credentials {
                username: self.mqtt.username.clone(),
                password: self.mqtt.password.clone(),
            })
        };

        BrokerEndpoint {
            host: self.mqtt.broker.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            credentials,
            keepalive: Duration::from_secs(self.mqtt.keepalive_secs),
            max_packet_size: self.mqtt.max_packet_bytes,
        }
    }

    /// Immutable subscription spec; assumes `validate()` has passed
    pub fn subscription_spec(&self) -> SubscriptionSpec {
        SubscriptionSpec {
            topic_filter: self.mqtt.topic.clone(),
            qos: qos_from_u8(self.mqtt.qos).unwrap_or(QoS::AtMostOnce),
        }
    }

    /// Backoff policy for the reconnection controller
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            immediate_first_retry: self.reconnect.immediate_first_retry,
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
            jitter: self.reconnect.jitter,
            stable_after: Duration::from_millis(self.reconnect.stable_after_ms),
        }
    }

    /// Bound applied to each connect attempt
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }

    /// Render as TOML with the password masked
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if !shown.mqtt.password.is_empty() {
            shown.mqtt.password = "***".to_string();
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}

/// Map a numeric QoS level to the rumqttc type
pub fn qos_from_u8(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidConfig(format!(
            "mqtt.qos must be 0, 1 or 2 (got {other})"
        ))),
    }
}

/// Parse a level name, also accepting the `WARNING` and `CRITICAL` spellings
pub fn parse_log_level(level: &str) -> Option<tracing::Level> {
    match level.trim().to_uppercase().as_str() {
        "ERROR" | "CRITICAL" => Some(tracing::Level::ERROR),
        "WARN" | "WARNING" => Some(tracing::Level::WARN),
        "INFO" => Some(tracing::Level::INFO),
        "DEBUG" => Some(tracing::Level::DEBUG),
        "TRACE" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

/// Validate an MQTT topic filter
///
/// `+` must occupy a whole level and `#` must be the whole last level.
pub fn validate_topic_filter(filter: &str) -> Result<(), ConfigError> {
    if filter.is_empty() {
        return Err(invalid("mqtt.topic must not be empty"));
    }
    if filter.contains('\0') {
        return Err(invalid("mqtt.topic must not contain NUL characters"));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != levels.len() - 1) {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.topic '{filter}': '#' must be the entire last level"
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.topic '{filter}': '+' must occupy an entire level"
            )));
        }
    }
    Ok(())
}
