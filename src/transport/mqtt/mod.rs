//! MQTT v5 client over mutual TLS
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`tls`] - Credential loading, key/certificate matching and rustls setup
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`ack`] - Pairing publish callers with broker acknowledgements
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use iot_motion_sensor::config::SensorConfig;
//! use iot_motion_sensor::transport::mqtt::{default_inbound_handler, MqttClient, TlsCredentials};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = SensorConfig::load_from_file(std::path::Path::new("sensor.toml"))?;
//! let tls = TlsCredentials::load(&config.tls)?.into_client_config(config.tls.verify_broker)?;
//!
//! let mut client = MqttClient::new(&config.broker, tls, default_inbound_handler())?;
//! client.connect().await?;
//! client.publish("sensors/motion", br#"{"sensor":"on"}"#.to_vec()).await?;
//! client.disconnect(Duration::from_millis(250)).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod ack;
pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

// Re-export public types for convenience
pub use ack::{AckOutcome, AckTracker};
pub use client::MqttClient;
pub use connection::{ConnectionEvent, ConnectionState, MqttError, ReconnectConfig};
pub use message_handler::{default_inbound_handler, EventRoute, InboundHandler, MessageHandler};
pub use tls::{LeafCertificate, TlsCredentials, TlsError};
