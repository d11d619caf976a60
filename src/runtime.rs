//! Process bootstrap shared by both binaries
//!
//! All the coupling lives here: TLS material becomes a rustls config, the
//! MQTT client and the PIR driver are built from the configuration and
//! injected into [`MotionAgent`], and SIGINT/SIGTERM flip the shutdown channel.

use crate::agent::{LifecycleError, MotionAgent};
use crate::config::SensorConfig;
use crate::error::MotionResult;
use crate::sensor::PirMotionDriver;
use crate::transport::mqtt::{default_inbound_handler, MqttClient, TlsCredentials};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

/// Build the MQTT client from configured credentials
pub fn build_transport(config: &SensorConfig) -> MotionResult<MqttClient> {
    let credentials = TlsCredentials::load(&config.tls)?;
    let tls = credentials.into_client_config(config.tls.verify_broker)?;
    Ok(MqttClient::new(&config.broker, tls, default_inbound_handler())?)
}

/// Spawn a listener that flips the returned channel on SIGINT or SIGTERM
pub fn shutdown_on_signals() -> Result<watch::Receiver<bool>, LifecycleError> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(LifecycleError::Signals)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(LifecycleError::Signals)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = shutdown_tx.send(true);
    });

    Ok(shutdown_rx)
}

/// Run an agent for `config` until a shutdown signal arrives
pub async fn run_agent(config: SensorConfig) -> MotionResult<()> {
    info!(
        target_kind = config.target.kind(),
        topic = %config.publish_topic(),
        broker = %config.broker.broker_url(),
        sensor = %config.sensor.name,
        pin = config.sensor.pin,
        "Starting motion agent"
    );

    let transport = build_transport(&config)?;
    let driver = PirMotionDriver::new(config.sensor.pin, config.sensor.debounce_ms);
    let shutdown = shutdown_on_signals()?;

    MotionAgent::new(config, transport, driver)
        .run(shutdown)
        .await?;
    Ok(())
}
