//! Top-level error type for the motion sensor agents
//!
//! Each layer owns a `thiserror` enum next to its code; [`MotionError`]
//! collects them for the binaries, which log the error and exit non-zero.

use crate::agent::LifecycleError;
use crate::config::ConfigError;
use crate::sensor::SensorError;
use crate::transport::mqtt::{MqttError, TlsError};
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Result type for agent operations
pub type MotionResult<T> = Result<T, MotionError>;
