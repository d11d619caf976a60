//! Periodic "off" status for the telemetry agent
//!
//! Every tick publishes `Off` with a fresh timestamp regardless of what the
//! sensor is doing. The first tick fires one full interval after start.

use super::{PublishTrigger, Publisher, SensorState};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn the heartbeat loop; it ends when `shutdown` flips to true or its sender drops
pub fn spawn_heartbeat_task<T>(
    publisher: Arc<Publisher<T>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // First tick completes immediately, skip it

        info!(interval_secs = interval.as_secs(), "Heartbeat task started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // Failures are logged by the publisher; keep ticking
                    let _ = publisher
                        .publish_state(SensorState::Off, Utc::now(), PublishTrigger::Heartbeat)
                        .await;
                }
            }
        }

        debug!("Heartbeat task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PayloadStyle;
    use crate::testing::mocks::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let transport = Arc::new(MockTransport::new());
        let publisher = Arc::new(Publisher::new(
            transport.clone(),
            "sensors/motion",
            PayloadStyle::Shadow,
        ));
        let (tx, rx) = watch::channel(false);

        let handle = spawn_heartbeat_task(publisher, Duration::from_secs(15), rx);

        tokio::time::sleep(Duration::from_millis(14_900)).await;
        assert_eq!(transport.publish_attempts(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.publish_attempts(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let transport = Arc::new(MockTransport::with_failure());
        let publisher = Arc::new(Publisher::new(
            transport.clone(),
            "sensors/motion",
            PayloadStyle::Shadow,
        ));
        let (tx, rx) = watch::channel(false);

        let handle = spawn_heartbeat_task(publisher, Duration::from_secs(15), rx);
        tokio::time::sleep(Duration::from_secs(46)).await;

        assert_eq!(transport.publish_attempts(), 3);
        assert!(transport.get_published_messages().await.is_empty());

        drop(tx);
        handle.await.unwrap();
    }
}
