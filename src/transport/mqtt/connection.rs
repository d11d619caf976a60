//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! configuration handling and reconnection backoff.

use crate::config::BrokerSection;
use rumqttc::tokio_rustls::rustls::ClientConfig;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Connection dropped after being established, polling again (attempt count)
    Reconnecting(u32),
}

/// Inputs to the connection state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnAckReceived,
    ConnAckRefused(String),
    NetworkError(String),
    DisconnectedByBroker,
    ClientDisconnect,
}

impl ConnectionState {
    /// Determine the next state (pure function)
    ///
    /// A network error before the first ConnAck is terminal; afterwards the
    /// event loop keeps polling and rumqttc redials.
    pub fn next(&self, event: ConnectionEvent) -> ConnectionState {
        match (self, event) {
            (_, ConnectionEvent::ConnAckReceived) => ConnectionState::Connected,
            (_, ConnectionEvent::ConnAckRefused(reason)) => ConnectionState::Disconnected(reason),
            (_, ConnectionEvent::ClientDisconnect) => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
            (ConnectionState::Connecting, ConnectionEvent::NetworkError(reason)) => {
                ConnectionState::Disconnected(reason)
            }
            (ConnectionState::Disconnected(reason), ConnectionEvent::NetworkError(_)) => {
                ConnectionState::Disconnected(reason.clone())
            }
            (ConnectionState::Connected, _) => ConnectionState::Reconnecting(1),
            (ConnectionState::Reconnecting(n), _) => ConnectionState::Reconnecting(n + 1),
            (ConnectionState::Connecting, ConnectionEvent::DisconnectedByBroker) => {
                ConnectionState::Disconnected("Broker closed the connection".to_string())
            }
            (ConnectionState::Disconnected(reason), ConnectionEvent::DisconnectedByBroker) => {
                ConnectionState::Disconnected(reason.clone())
            }
        }
    }

    /// Whether publishes may be attempted in this state
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Backoff applied between event loop polls after a dropped connection
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Custom backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt using custom pattern
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {reason} (state: {state:?})")]
    ConnectionFailed {
        reason: String,
        state: ConnectionState,
    },
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker rejected publish: {0}")]
    PublishRejected(String),
    #[error("No acknowledgement within {0:?}")]
    PublishTimeout(Duration),
    #[error("Publish abandoned: {0}")]
    PublishAbandoned(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Map the configured numeric QoS onto rumqttc's enum
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    broker: &BrokerSection,
    tls: ClientConfig,
) -> Result<MqttOptions, MqttError> {
    let broker_url = broker.broker_url();
    let url = Url::parse(&broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.clone()))?;

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.clone()))?;
    let port = url.port().unwrap_or(broker.port);

    let mut mqtt_options = MqttOptions::new(broker.client_id.clone(), host, port);

    // ssl:// is TLS only
    let transport = RumqttcTransport::tls_with_config(TlsConfiguration::Rustls(Arc::new(tls)));
    mqtt_options.set_transport(transport);

    mqtt_options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs.max(5)));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::tokio_rustls::rustls::RootCertStore;

    fn test_tls_config() -> ClientConfig {
        ClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth()
    }

    fn test_broker() -> BrokerSection {
        BrokerSection {
            host_name: "broker.example.com".to_string(),
            client_id: "motion-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![250, 500, 1000, 2000]);
        assert_eq!(config.sustained_delay, 5000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 250);
        assert_eq!(config.calculate_backoff_delay(2), 500);
        assert_eq!(config.calculate_backoff_delay(4), 2000);

        // Sustained delay after pattern exhausted
        assert_eq!(config.calculate_backoff_delay(5), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_empty_backoff_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 42,
        };
        assert_eq!(config.calculate_backoff_delay(1), 42);
    }

    #[test]
    fn test_state_transitions_before_first_connack() {
        let state = ConnectionState::Connecting;
        assert_eq!(
            state.next(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            state.next(ConnectionEvent::NetworkError("refused".to_string())),
            ConnectionState::Disconnected("refused".to_string())
        );
        assert!(matches!(
            state.next(ConnectionEvent::ConnAckRefused("NotAuthorized".to_string())),
            ConnectionState::Disconnected(_)
        ));
    }

    #[test]
    fn test_state_transitions_after_connect() {
        let state = ConnectionState::Connected;
        let dropped = state.next(ConnectionEvent::NetworkError("reset".to_string()));
        assert_eq!(dropped, ConnectionState::Reconnecting(1));
        assert_eq!(
            dropped.next(ConnectionEvent::NetworkError("reset".to_string())),
            ConnectionState::Reconnecting(2)
        );
        assert_eq!(
            dropped.next(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert!(matches!(
            state.next(ConnectionEvent::ClientDisconnect),
            ConnectionState::Disconnected(_)
        ));
    }

    #[test]
    fn test_can_publish_only_when_connected() {
        assert!(ConnectionState::Connected.can_publish());
        assert!(!ConnectionState::Connecting.can_publish());
        assert!(!ConnectionState::Reconnecting(3).can_publish());
        assert!(!ConnectionState::Disconnected("x".to_string()).can_publish());
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_broker(), test_tls_config()).unwrap();
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
        assert_eq!(options.client_id(), "motion-test");
    }

    #[test]
    fn test_empty_host_is_invalid() {
        let mut broker = test_broker();
        broker.host_name = String::new();

        let result = configure_mqtt_options(&broker, test_tls_config());
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed {
                reason: "test".to_string(),
                state: ConnectionState::Connecting,
            },
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::PublishRejected("NotAuthorized".to_string()),
            MqttError::PublishTimeout(Duration::from_secs(10)),
            MqttError::PublishAbandoned("connection lost".to_string()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected("test".to_string()),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
