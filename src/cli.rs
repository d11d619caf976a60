//! Command-line flags for both agents
//!
//! Every flag may also come from an environment variable. With `--config`,
//! the TOML file is the base and any flag given overrides it; without it,
//! missing flags are empty strings and tunables keep their defaults.

use crate::config::{ConfigError, PublishTarget, SensorConfig};
use clap::{Args, Parser};
use std::path::PathBuf;

/// Flags shared by both agents
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// MQTT client identifier
    #[arg(long = "client-id", env = "IOT_CLIENT_ID", value_name = "ID")]
    pub client_id: Option<String>,

    /// Client certificate (PEM)
    #[arg(long = "client-certificate", env = "IOT_CLIENT_CERTIFICATE", value_name = "FILE")]
    pub client_certificate: Option<String>,

    /// CA bundle used to verify the broker (PEM)
    #[arg(long = "ca-certificate", env = "IOT_CA_CERTIFICATE", value_name = "FILE")]
    pub ca_certificate: Option<String>,

    /// Private key of the client certificate (PEM)
    #[arg(long = "private-key", env = "IOT_PRIVATE_KEY", value_name = "FILE")]
    pub private_key: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(short, long, env = "IOT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Broker port
    #[arg(long, env = "IOT_PORT")]
    pub port: Option<u16>,

    /// Publish QoS (0 or 1)
    #[arg(long, env = "IOT_QOS", value_parser = clap::value_parser!(u8).range(0..=1))]
    pub qos: Option<u8>,

    /// BCM GPIO pin of the PIR output
    #[arg(long, env = "IOT_PIN")]
    pub pin: Option<u8>,

    /// Sensor name used in logs
    #[arg(long = "sensor-name", env = "IOT_SENSOR_NAME")]
    pub sensor_name: Option<String>,

    /// UTC offset of detection timestamps, e.g. +09:00
    #[arg(long = "utc-offset", env = "IOT_UTC_OFFSET", allow_hyphen_values = true)]
    pub utc_offset: Option<String>,

    /// Seconds to wait for a broker acknowledgement
    #[arg(long = "publish-timeout", env = "IOT_PUBLISH_TIMEOUT", value_name = "SECS")]
    pub publish_timeout: Option<u64>,

    /// Verify the broker certificate against the CA bundle
    #[arg(long = "verify-broker", env = "IOT_VERIFY_BROKER")]
    pub verify_broker: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long = "print-config")]
    pub print_config: bool,
}

/// Publishes motion detections and a periodic heartbeat to a topic
#[derive(Debug, Clone, Parser)]
#[command(name = "iot-motion-sensor")]
#[command(about = "Publish PIR motion detections to an MQTT topic over mutual TLS")]
#[command(version)]
pub struct TelemetryArgs {
    /// Broker hostname
    #[arg(long = "host-name", env = "IOT_HOST_NAME", value_name = "HOST")]
    pub host_name: Option<String>,

    /// Topic detections are published to
    #[arg(long, env = "IOT_ENDPOINT", value_name = "TOPIC")]
    pub endpoint: Option<String>,

    /// Seconds between "off" heartbeats
    #[arg(long = "heartbeat-interval", env = "IOT_HEARTBEAT_INTERVAL", value_name = "SECS")]
    pub heartbeat_interval: Option<u64>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Mirrors the PIR sensor state into a device shadow
#[derive(Debug, Clone, Parser)]
#[command(name = "iot-motion-shadow")]
#[command(about = "Report PIR motion state to a device shadow over mutual TLS")]
#[command(version)]
pub struct ShadowArgs {
    /// Broker hostname
    #[arg(long = "hostName", env = "IOT_HOST_NAME", value_name = "HOST")]
    pub host_name: Option<String>,

    /// Thing whose shadow is updated
    #[arg(long = "thing-name", env = "IOT_THING_NAME", value_name = "NAME")]
    pub thing_name: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl CommonArgs {
    /// Load the base configuration: the file if given, else all defaults
    fn base(&self, default_target: PublishTarget) -> Result<SensorConfig, ConfigError> {
        match &self.config {
            Some(path) => SensorConfig::load_from_file(path),
            None => Ok(SensorConfig::with_target(default_target)),
        }
    }

    fn apply(&self, config: &mut SensorConfig) {
        if let Some(client_id) = &self.client_id {
            config.broker.client_id = client_id.clone();
        }
        if let Some(path) = &self.client_certificate {
            config.tls.client_certificate = path.clone();
        }
        if let Some(path) = &self.ca_certificate {
            config.tls.ca_certificate = path.clone();
        }
        if let Some(path) = &self.private_key {
            config.tls.private_key = path.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(qos) = self.qos {
            config.broker.qos = qos;
        }
        if let Some(pin) = self.pin {
            config.sensor.pin = pin;
        }
        if let Some(name) = &self.sensor_name {
            config.sensor.name = name.clone();
        }
        if let Some(offset) = &self.utc_offset {
            config.sensor.utc_offset = offset.clone();
        }
        if let Some(secs) = self.publish_timeout {
            config.broker.publish_timeout_secs = secs;
        }
        if self.verify_broker {
            config.tls.verify_broker = true;
        }
    }
}

impl TelemetryArgs {
    /// Effective configuration of the telemetry agent
    pub fn into_config(self) -> Result<SensorConfig, ConfigError> {
        let mut config = self.common.base(PublishTarget::Topic {
            endpoint: String::new(),
        })?;

        let file_endpoint = match &config.target {
            PublishTarget::Topic { endpoint } => endpoint.clone(),
            PublishTarget::Shadow { .. } => String::new(),
        };
        config.target = PublishTarget::Topic {
            endpoint: self.endpoint.unwrap_or(file_endpoint),
        };

        if let Some(host_name) = self.host_name {
            config.broker.host_name = host_name;
        }
        if let Some(secs) = self.heartbeat_interval {
            config.heartbeat.interval_secs = secs;
        }
        self.common.apply(&mut config);

        config.validate()?;
        Ok(config)
    }
}

impl ShadowArgs {
    /// Effective configuration of the shadow agent
    pub fn into_config(self) -> Result<SensorConfig, ConfigError> {
        let mut config = self.common.base(PublishTarget::Shadow {
            thing_name: String::new(),
        })?;

        let file_thing = match &config.target {
            PublishTarget::Shadow { thing_name } => thing_name.clone(),
            PublishTarget::Topic { .. } => String::new(),
        };
        config.target = PublishTarget::Shadow {
            thing_name: self.thing_name.unwrap_or(file_thing),
        };

        if let Some(host_name) = self.host_name {
            config.broker.host_name = host_name;
        }
        self.common.apply(&mut config);

        config.validate()?;
        Ok(config)
    }
}
