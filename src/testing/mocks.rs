//! Mock implementations for testing
//!
//! Provides a recording [`Transport`] and a scripted [`EdgeDriver`] so the
//! agents can be exercised without a broker or a Raspberry Pi.

use crate::sensor::{EdgeDriver, MotionEvent, MotionKind, SensorError};
use crate::transport::{mqtt::ConnectionState, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub type PublishedMessage = (String, Vec<u8>);

/// Errors reported by [`MockTransport`]
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Mock connection failure")]
    ConnectFailed,
    #[error("Mock publish failure")]
    PublishFailed,
}

/// Mock transport for testing
///
/// Clones share their recorded state, so a test can keep a clone as an observer
/// after handing the transport to an agent.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub should_fail: Arc<AtomicBool>,
    pub fail_connect: bool,
    /// Simulated broker round trip before each publish is recorded
    pub publish_delay: Option<Duration>,
    publish_attempts: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    disconnect_calls: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    /// `connect` fails, as if the broker refused the session
    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn with_publish_delay(delay: Duration) -> Self {
        Self {
            publish_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Flip publish failures on or off while the transport is shared
    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Payloads as UTF-8 text, in publish order
    pub async fn get_published_payloads(&self) -> Vec<String> {
        self.published_messages
            .lock()
            .await
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Publish calls, successful or not
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.fail_connect {
            return Err(MockTransportError::ConnectFailed);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::PublishFailed);
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.fail_connect {
            Some(ConnectionState::Disconnected(
                "Mock disconnection".to_string(),
            ))
        } else if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            None
        }
    }
}

/// Driver replaying a fixed list of edges, each after its delay
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    script: Vec<(Duration, MotionKind)>,
    hold_open: bool,
    arm_error: Option<SensorError>,
    armed: Arc<AtomicBool>,
    disarmed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ScriptedDriver {
    /// Replays `script` and closes the channel once it is done
    pub fn new(script: Vec<(Duration, MotionKind)>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// Driver whose `arm` fails with `error`
    pub fn failing(error: SensorError) -> Self {
        Self {
            arm_error: Some(error),
            ..Default::default()
        }
    }

    /// Keep the channel open after the script, like real hardware
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn armed_flag(&self) -> Arc<AtomicBool> {
        self.armed.clone()
    }

    pub fn disarmed_flag(&self) -> Arc<AtomicBool> {
        self.disarmed.clone()
    }
}

impl EdgeDriver for ScriptedDriver {
    fn arm(&mut self, edges: mpsc::UnboundedSender<MotionEvent>) -> Result<(), SensorError> {
        if let Some(error) = self.arm_error.take() {
            return Err(error);
        }
        if self.task.is_some() {
            return Err(SensorError::AlreadyArmed);
        }

        let script = std::mem::take(&mut self.script);
        let hold_open = self.hold_open;
        self.armed.store(true, Ordering::SeqCst);

        self.task = Some(tokio::spawn(async move {
            for (delay, kind) in script {
                tokio::time::sleep(delay).await;
                if edges.send(MotionEvent::now(kind)).is_err() {
                    return;
                }
            }
            if hold_open {
                edges.closed().await;
            }
        }));
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.disarmed.store(true, Ordering::SeqCst);
    }
}
