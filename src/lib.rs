//! PIR motion sensor agents
//!
//! Two command-line agents watch a passive-infrared sensor on a Raspberry Pi
//! GPIO pin and publish its state to an MQTT broker over mutual TLS:
//!
//! - `iot-motion-sensor` publishes `{"sensor":"on","detected_at":"..."}` to a
//!   topic on each detection, plus an "off" heartbeat every 15 seconds.
//! - `iot-motion-shadow` reports `{"state":{"reported":{"sensor":"on"}}}` and
//!   `"off"` to `$aws/things/<thing>/shadow/update` on each edge.
//!
//! # Quick Start
//!
//! ```rust
//! use iot_motion_sensor::config::{PublishTarget, SensorConfig};
//! use iot_motion_sensor::publisher::{SensorState, StatusMessage};
//!
//! let config = SensorConfig::with_target(PublishTarget::Shadow {
//!     thing_name: "pir-01".to_string(),
//! });
//! assert_eq!(config.publish_topic(), "$aws/things/pir-01/shadow/update");
//!
//! let payload = StatusMessage::shadow_report(SensorState::On).to_payload().unwrap();
//! assert_eq!(payload, br#"{"state":{"reported":{"sensor":"on"}}}"#);
//! ```

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod publisher;
pub mod runtime;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use agent::{LifecycleError, MotionAgent};
pub use config::*;
pub use error::{MotionError, MotionResult};
pub use transport::mqtt::MqttClient;
