//! Transport layer for sensor telemetry
//!
//! This module provides the transport abstraction and its MQTT
//! implementation.

use std::time::Duration;

pub mod mqtt;

/// Transport trait for publishing sensor messages
///
/// This trait provides an abstraction over the broker connection
/// to enable dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait for it to accept the session
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect, giving in-flight publishes up to `grace` to complete
    async fn disconnect(&self, grace: Duration) -> Result<(), Self::Error>;

    /// Publish a payload and wait until the broker has accepted it
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<crate::transport::mqtt::ConnectionState>;
}
