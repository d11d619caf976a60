//! Motion agent lifecycle management
//!
//! Startup sequence: connect the transport, build the publisher for the
//! configured target, register it with the motion source, start the heartbeat
//! (topic target only). The motion loop then blocks until shutdown, after
//! which the heartbeat stops and the transport disconnects within the grace
//! period.

use crate::config::{ConfigError, PublishTarget, SensorConfig};
use crate::publisher::{spawn_heartbeat_task, Publisher};
use crate::sensor::{EdgeDriver, MotionEventSource, MotionKind, SensorError};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Agent lifecycle management with dependency injection
pub struct MotionAgent<T, D>
where
    T: Transport + 'static,
    D: EdgeDriver,
{
    config: SensorConfig,
    transport: T,
    driver: D,
}

impl<T, D> MotionAgent<T, D>
where
    T: Transport + 'static,
    D: EdgeDriver,
{
    /// Create a new agent with injected transport and motion driver
    pub fn new(config: SensorConfig, transport: T, driver: D) -> Self {
        Self {
            config,
            transport,
            driver,
        }
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    // ========== PURE HELPER FUNCTIONS ==========

    /// Edges the publisher listens to: the shadow mirrors both, the
    /// telemetry topic only reports detections
    pub fn listened_kinds(target: &PublishTarget) -> &'static [MotionKind] {
        match target {
            PublishTarget::Topic { .. } => &[MotionKind::Started],
            PublishTarget::Shadow { .. } => &[MotionKind::Started, MotionKind::Stopped],
        }
    }

    /// Heartbeat period, if this target has one
    pub fn heartbeat_interval(config: &SensorConfig) -> Option<Duration> {
        match config.target {
            PublishTarget::Topic { .. } => {
                Some(Duration::from_secs(config.heartbeat.interval_secs))
            }
            PublishTarget::Shadow { .. } => None,
        }
    }

    pub fn disconnect_grace(config: &SensorConfig) -> Duration {
        Duration::from_millis(config.broker.disconnect_grace_ms)
    }

    /// Run the agent until `shutdown` flips to true or the motion driver stops.
    ///
    /// Connection and sensor failures are returned; publish failures are not.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), LifecycleError> {
        let MotionAgent {
            config,
            transport,
            driver,
        } = self;

        let span = crate::lifecycle_span!(
            target_kind = config.target.kind(),
            topic = %config.publish_topic(),
            client_id = %config.broker.client_id
        );

        Self::drive(config, transport, driver, shutdown)
            .instrument(span)
            .await
    }

    async fn drive(
        config: SensorConfig,
        mut transport: T,
        driver: D,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), LifecycleError> {
        Self::check_payload_settings(&config)?;

        transport
            .connect()
            .await
            .map_err(|e| LifecycleError::Transport(Box::new(e)))?;
        info!("Transport connected");

        let transport = Arc::new(transport);
        let publisher = Arc::new(Publisher::for_config(transport.clone(), &config)?);

        let mut source = MotionEventSource::new(driver);
        for kind in Self::listened_kinds(&config.target) {
            source.on(*kind, publisher.clone());
        }

        let heartbeat = Self::heartbeat_interval(&config).map(|interval| {
            spawn_heartbeat_task(publisher.clone(), interval, shutdown.clone())
        });

        info!("Motion agent running");
        let outcome = source.run(shutdown).await;
        if let Err(e) = &outcome {
            error!(error = %e, "Motion source failed");
        }

        Self::stop_heartbeat(heartbeat).await;

        let grace = Self::disconnect_grace(&config);
        if let Err(e) = transport.disconnect(grace).await {
            warn!(error = %e, "Disconnect did not complete cleanly");
        }

        info!("Motion agent stopped");
        outcome.map_err(LifecycleError::from)
    }

    /// Reject settings the publisher cannot render, before touching the network
    fn check_payload_settings(config: &SensorConfig) -> Result<(), ConfigError> {
        if let PublishTarget::Topic { .. } = config.target {
            config.sensor.offset()?;
        }
        Ok(())
    }

    async fn stop_heartbeat(handle: Option<JoinHandle<()>>) {
        // Shutdown may not have been signalled if the driver stopped on its own
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Heartbeat shutdown error: {}", e);
                }
            }
        }
    }
}

/// Agent lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}
