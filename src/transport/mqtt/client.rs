//! Impure I/O operations for MQTT client
//!
//! This module handles network communication, async coordination and the
//! integration with the rumqttc client. Pure decisions live in
//! [`super::connection`], [`super::message_handler`] and [`super::ack`].

use super::ack::{AckOutcome, AckTracker};
use super::connection::{
    configure_mqtt_options, qos_from_level, ConnectionEvent, ConnectionState, MqttError,
    ReconnectConfig,
};
use super::message_handler::{EventRoute, InboundHandler, MessageHandler};
use crate::config::BrokerSection;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::tokio_rustls::rustls::ClientConfig;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for the first ConnAck
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while draining acknowledgements before disconnect
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// MQTT v5 client over mutual TLS with acknowledged publishes
pub struct MqttClient {
    client_id: String,
    broker_url: String,
    /// The lock doubles as the publish lock: enqueue order is ack order
    client: Arc<Mutex<AsyncClient>>,
    /// Taken by `connect`; rumqttc's event loop is not `Sync`
    event_loop: Mutex<Option<EventLoop>>,
    qos: QoS,
    publish_timeout: Duration,
    acks: Arc<AckTracker>,
    inbound: InboundHandler,
    reconnect_config: ReconnectConfig,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Build the client; nothing touches the network until [`MqttClient::connect`]
    pub fn new(
        broker: &BrokerSection,
        tls: ClientConfig,
        inbound: InboundHandler,
    ) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(broker, tls)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        Ok(MqttClient {
            client_id: broker.client_id.clone(),
            broker_url: broker.broker_url(),
            client: Arc::new(Mutex::new(client)),
            event_loop: Mutex::new(Some(event_loop)),
            qos: qos_from_level(broker.qos),
            publish_timeout: Duration::from_secs(broker.publish_timeout_secs),
            acks: Arc::new(AckTracker::new()),
            inbound,
            reconnect_config: ReconnectConfig::default(),
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            event_loop_handle: Mutex::new(None),
        })
    }

    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed {
                            reason: reason.clone(),
                            state: ConnectionState::Disconnected(reason.clone()),
                        });
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed {
                        reason: "State channel closed".to_string(),
                        state: state_rx.borrow().clone(),
                    });
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed {
                reason: "ConnAck timeout - no connection confirmation received".to_string(),
                state: ConnectionState::Connecting,
            }),
        }
    }

    /// Connect to the broker and wait for the ConnAck.
    ///
    /// Any failure before the first ConnAck is final; the event loop task is
    /// stopped and the caller is expected to abort.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let Some(event_loop) = self.event_loop.get_mut().take() else {
            return Err(MqttError::ConnectionFailed {
                reason: "Event loop already started".to_string(),
                state: self
                    .connection_state()
                    .unwrap_or(ConnectionState::Connecting),
            });
        };

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        info!(
            broker = %self.broker_url,
            client_id = %self.client_id,
            "Connecting to MQTT broker"
        );

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            state_tx,
            shutdown_rx,
            self.acks.clone(),
            self.inbound.clone(),
            self.reconnect_config.clone(),
            self.client_id.clone(),
        ));
        *self.event_loop_handle.lock().await = Some(handle);

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, CONNECT_TIMEOUT).await {
            error!(
                broker = %self.broker_url,
                client_id = %self.client_id,
                state = ?self.connection_state(),
                error = %e,
                "MQTT broker not connected"
            );
            self.stop_event_loop(Instant::now()).await;
            return Err(e);
        }

        info!(broker = %self.broker_url, "MQTT broker connected");
        Ok(())
    }

    /// Drive rumqttc until shutdown, or until a failure before the first ConnAck
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        acks: Arc<AckTracker>,
        inbound: InboundHandler,
        reconnect_config: ReconnectConfig,
        client_id: String,
    ) {
        debug!(client_id = %client_id, "Starting MQTT event loop");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::process_event_route(
                                route,
                                &state_tx,
                                &acks,
                                &inbound,
                                &mut reconnect_attempts,
                            )
                        }
                        Err(e) => {
                            Self::handle_event_loop_error(
                                e,
                                &state_tx,
                                &acks,
                                &reconnect_config,
                                shutdown_rx.clone(),
                                &mut reconnect_attempts,
                            )
                            .await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        acks.abandon_all("event loop stopped");
        debug!(client_id = %client_id, "MQTT event loop stopped");
    }

    fn transition(
        state_tx: &watch::Sender<ConnectionState>,
        event: ConnectionEvent,
    ) -> ConnectionState {
        let next = state_tx.borrow().next(event);
        let _ = state_tx.send(next.clone());
        next
    }

    /// Process routed MQTT event
    /// Returns true to continue loop, false to break
    fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        acks: &AckTracker,
        inbound: &InboundHandler,
        reconnect_attempts: &mut u32,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                if *reconnect_attempts > 0 {
                    info!(attempts = *reconnect_attempts, "MQTT connection re-established");
                }
                Self::transition(state_tx, ConnectionEvent::ConnAckReceived);
                *reconnect_attempts = 0;
                true
            }
            EventRoute::ConnectionRefused(reason) => {
                error!(reason = %reason, "Broker refused the connection");
                Self::transition(state_tx, ConnectionEvent::ConnAckRefused(reason));
                false
            }
            EventRoute::MessageReceived { topic, payload } => {
                inbound(&topic, &payload);
                true
            }
            EventRoute::PublishSent(pkid) => {
                acks.on_sent(pkid);
                true
            }
            EventRoute::PublishAcknowledged { pkid, outcome } => {
                acks.on_acked(pkid, outcome);
                true
            }
            EventRoute::Disconnected => {
                warn!("Broker sent DISCONNECT");
                acks.abandon_all("broker disconnected");
                Self::transition(state_tx, ConnectionEvent::DisconnectedByBroker);
                true
            }
            EventRoute::DisconnectSent => {
                Self::transition(state_tx, ConnectionEvent::ClientDisconnect);
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Handle event loop error
    /// Returns true to keep polling (rumqttc redials), false to break
    async fn handle_event_loop_error(
        error: rumqttc::v5::ConnectionError,
        state_tx: &watch::Sender<ConnectionState>,
        acks: &AckTracker,
        reconnect_config: &ReconnectConfig,
        shutdown_rx: watch::Receiver<bool>,
        reconnect_attempts: &mut u32,
    ) -> bool {
        let reason = error.to_string();
        acks.abandon_all(&reason);

        let next = Self::transition(state_tx, ConnectionEvent::NetworkError(reason.clone()));
        if let ConnectionState::Disconnected(_) = next {
            error!(error = %reason, "MQTT connection failed");
            return false;
        }

        *reconnect_attempts += 1;
        let delay_ms = reconnect_config.calculate_backoff_delay(*reconnect_attempts);
        warn!(
            error = %reason,
            attempt = *reconnect_attempts,
            delay_ms,
            "MQTT connection lost, polling again after backoff"
        );

        Self::interruptible_sleep(shutdown_rx, delay_ms).await
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                true
            }
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self
            .connection_state()
            .unwrap_or(ConnectionState::Disconnected("Never connected".to_string()));

        if !current_state.can_publish() {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    /// Publish and wait for the broker's answer.
    ///
    /// Safe to call concurrently; enqueueing is serialized, waiting is not.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let ack = {
            let client = self.client.lock().await;
            let ack = self.acks.register();
            if let Err(e) = client.publish(topic, self.qos, false, payload).await {
                self.acks.discard_last();
                return Err(MqttError::PublishFailed(Box::new(e)));
            }
            ack
        };

        match tokio::time::timeout(self.publish_timeout, ack).await {
            Ok(Ok(AckOutcome::Delivered)) => Ok(()),
            Ok(Ok(AckOutcome::Rejected(reason))) => Err(MqttError::PublishRejected(reason)),
            Ok(Ok(AckOutcome::Abandoned(reason))) => Err(MqttError::PublishAbandoned(reason)),
            Ok(Err(_)) => Err(MqttError::PublishAbandoned(
                "event loop stopped".to_string(),
            )),
            Err(_) => Err(MqttError::PublishTimeout(self.publish_timeout)),
        }
    }

    /// Disconnect within `grace`: drain in-flight acknowledgements, send
    /// DISCONNECT and stop the event loop, all against one deadline
    pub async fn disconnect(&self, grace: Duration) -> Result<(), MqttError> {
        let deadline = Instant::now() + grace;
        while self.acks.pending() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let pending = self.acks.pending();
        if pending > 0 {
            warn!(pending, "Disconnecting with unacknowledged publishes");
        }

        let mut result = Ok(());
        if self.is_connected() {
            let send_disconnect = async {
                let client = self.client.lock().await;
                client.disconnect().await
            };
            result = match tokio::time::timeout_at(deadline, send_disconnect).await {
                Ok(sent) => sent.map_err(|e| MqttError::DisconnectFailed(Box::new(e))),
                Err(_) => Err(MqttError::DisconnectFailed(
                    "DISCONNECT not queued before the grace period ended".into(),
                )),
            };
        }

        self.stop_event_loop(deadline).await;

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        info!("MQTT client disconnected");
        result
    }

    /// Let the event loop finish on its own until `deadline`, then abort it
    async fn stop_event_loop(&self, deadline: Instant) {
        let Some(mut handle) = self.event_loop_handle.lock().await.take() else {
            return;
        };

        if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
            debug!("Event loop task shut down gracefully");
            return;
        }

        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        warn!("Event loop task didn't shut down in time, forcing abort");
        handle.abort();

        match handle.await {
            Err(e) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            _ => debug!("Event loop task stopped"),
        }
    }

    /// Get current connection state
    /// Returns None if connection hasn't been attempted yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), Self::Error> {
        MqttClient::disconnect(self, grace).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}
