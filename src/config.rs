//! Configuration for the motion sensor agents
//!
//! A [`SensorConfig`] is built once at startup, either purely from command-line
//! flags (see [`crate::cli`]) or from a TOML file with flags layered on top.
//! Empty strings are allowed everywhere: missing certificate paths or hostnames
//! surface later, when the TLS credentials are loaded or the broker is dialed.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Fixed MQTT-over-TLS port used by the cloud broker
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Heartbeat interval of the telemetry agent
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Grace period granted to in-flight acknowledgements at shutdown
pub const DEFAULT_DISCONNECT_GRACE_MS: u64 = 250;

/// Topic template for device shadow updates
const SHADOW_UPDATE_TOPIC: &str = "$aws/things/{thing}/shadow/update";

/// Complete agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub tls: TlsSection,
    pub target: PublishTarget,
    #[serde(default)]
    pub sensor: SensorSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker hostname, e.g. `xxxx-ats.iot.ap-northeast-1.amazonaws.com`
    #[serde(default)]
    pub host_name: String,
    /// MQTT client identifier
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Publish QoS, 0 or 1
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on waiting for a broker acknowledgement
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
}

/// Certificate material for mutual TLS
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    #[serde(default)]
    pub ca_certificate: String,
    #[serde(default)]
    pub client_certificate: String,
    #[serde(default)]
    pub private_key: String,
    /// Verify the broker certificate chain against `ca_certificate`
    #[serde(default)]
    pub verify_broker: bool,
}

/// Where status messages are published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishTarget {
    /// Free-form topic, timestamped detection payloads
    Topic { endpoint: String },
    /// Device shadow of the named thing, reported-state payloads
    Shadow { thing_name: String },
}

/// PIR sensor wiring and presentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    /// BCM GPIO pin the PIR output is wired to
    #[serde(default = "default_pin")]
    pub pin: u8,
    #[serde(default = "default_sensor_name")]
    pub name: String,
    /// Offset detection timestamps are rendered in, e.g. `+09:00`
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// Edge debounce in milliseconds, 0 disables it
    #[serde(default)]
    pub debounce_ms: u64,
}

/// Liveness heartbeat of the telemetry agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_publish_timeout_secs() -> u64 {
    10
}

fn default_disconnect_grace_ms() -> u64 {
    DEFAULT_DISCONNECT_GRACE_MS
}

fn default_pin() -> u8 {
    12
}

fn default_sensor_name() -> String {
    "motionBot".to_string()
}

fn default_utc_offset() -> String {
    "+09:00".to_string()
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            client_id: String::new(),
            port: default_broker_port(),
            qos: default_qos(),
            keep_alive_secs: default_keep_alive_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
        }
    }
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            pin: default_pin(),
            name: default_sensor_name(),
            utc_offset: default_utc_offset(),
            debounce_ms: 0,
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
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
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BrokerSection {
    /// Broker URL in the `ssl://host:port` form
    pub fn broker_url(&self) -> String {
        format!("ssl://{}:{}", self.host_name, self.port)
    }
}

impl SensorSection {
    /// Parse the configured UTC offset
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset.parse::<FixedOffset>().map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "utc_offset '{}' is not a valid offset such as +09:00: {e}",
                self.utc_offset
            ))
        })
    }
}

impl PublishTarget {
    /// Topic every status message of this process goes to
    pub fn topic(&self) -> String {
        match self {
            PublishTarget::Topic { endpoint } => endpoint.clone(),
            PublishTarget::Shadow { thing_name } => shadow_update_topic(thing_name),
        }
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PublishTarget::Topic { .. } => "topic",
            PublishTarget::Shadow { .. } => "shadow",
        }
    }
}

/// Shadow update topic for a thing: `$aws/things/{thing}/shadow/update`
pub fn shadow_update_topic(thing_name: &str) -> String {
    SHADOW_UPDATE_TOPIC.replace("{thing}", thing_name)
}

impl SensorConfig {
    /// Configuration with every string empty and every tunable at its default
    pub fn with_target(target: PublishTarget) -> Self {
        Self {
            broker: BrokerSection::default(),
            tls: TlsSection::default(),
            target,
            sensor: SensorSection::default(),
            heartbeat: HeartbeatSection::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SensorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that cannot be interpreted at all.
    ///
    /// Empty strings pass: they fail downstream with a more specific error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.qos > 1 {
            return Err(ConfigError::InvalidConfig(format!(
                "qos must be 0 or 1, got {}",
                self.broker.qos
            )));
        }

        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat interval must be at least one second".to_string(),
            ));
        }

        if self.broker.publish_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish timeout must be at least one second".to_string(),
            ));
        }

        self.sensor.offset()?;
        Ok(())
    }

    /// Topic fixed for the lifetime of the process
    pub fn publish_topic(&self) -> String {
        self.target.topic()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host_name = "broker.example.com"
client_id = "motion-test"

[tls]
ca_certificate = "certs/AmazonRootCA1.pem"
client_certificate = "certs/device.pem.crt"
private_key = "certs/device.pem.key"

[target]
kind = "topic"
endpoint = "sensors/motion"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
