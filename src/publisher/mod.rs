//! Status publishing
//!
//! A [`Publisher`] turns sensor states into [`StatusMessage`]s and sends them
//! to the topic fixed at startup. Failures are logged and dropped: the next
//! edge or heartbeat carries fresh state anyway.

use crate::config::{ConfigError, PublishTarget, SensorConfig};
use crate::sensor::{MotionEvent, MotionKind, MotionListener};
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

pub mod heartbeat;
pub mod status;

pub use heartbeat::spawn_heartbeat_task;
pub use status::{SensorState, StatusMessage};

/// Which JSON shape the publisher emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStyle {
    /// Timestamped detection messages, rendered in `offset`
    Detection { offset: FixedOffset },
    /// Device shadow reported-state documents
    Shadow,
}

/// What caused a publish, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTrigger {
    Edge,
    Heartbeat,
}

impl fmt::Display for PublishTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishTrigger::Edge => write!(f, "edge"),
            PublishTrigger::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Errors from a single publish attempt
#[derive(Debug, thiserror::Error)]
pub enum PublishError<E: std::error::Error + 'static> {
    #[error("Failed to serialize status message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Transport rejected status message: {0}")]
    Transport(#[source] E),
}

pub struct Publisher<T: Transport> {
    transport: Arc<T>,
    topic: String,
    style: PayloadStyle,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: Arc<T>, topic: impl Into<String>, style: PayloadStyle) -> Self {
        Self {
            transport,
            topic: topic.into(),
            style,
        }
    }

    /// Publisher matching the configured target: detections for a topic,
    /// reported state for a shadow
    pub fn for_config(transport: Arc<T>, config: &SensorConfig) -> Result<Self, ConfigError> {
        let style = match config.target {
            PublishTarget::Topic { .. } => PayloadStyle::Detection {
                offset: config.sensor.offset()?,
            },
            PublishTarget::Shadow { .. } => PayloadStyle::Shadow,
        };
        Ok(Self::new(transport, config.publish_topic(), style))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn style(&self) -> PayloadStyle {
        self.style
    }

    /// Build the message for `state` observed at `at`
    pub fn message(&self, state: SensorState, at: DateTime<Utc>) -> StatusMessage {
        match self.style {
            PayloadStyle::Detection { offset } => StatusMessage::detection(state, at, offset),
            PayloadStyle::Shadow => StatusMessage::shadow_report(state),
        }
    }

    /// Serialize and publish one message. Never retries.
    pub async fn publish_state(
        &self,
        state: SensorState,
        at: DateTime<Utc>,
        trigger: PublishTrigger,
    ) -> Result<(), PublishError<T::Error>> {
        let payload = self.message(state, at).to_payload()?;
        let span = crate::publish_span!(topic = %self.topic, %trigger, ?state);

        match self
            .transport
            .publish(&self.topic, payload)
            .instrument(span)
            .await
        {
            Ok(()) => {
                info!(topic = %self.topic, %trigger, ?state, "Published status message");
                Ok(())
            }
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    %trigger,
                    ?state,
                    error = %e,
                    "Failed to publish status message"
                );
                Err(PublishError::Transport(e))
            }
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> MotionListener for Publisher<T> {
    async fn on_motion(&self, event: MotionEvent) {
        let state = match event.kind {
            MotionKind::Started => SensorState::On,
            MotionKind::Stopped => SensorState::Off,
        };
        // Already logged
        let _ = self
            .publish_state(state, event.detected_at, PublishTrigger::Edge)
            .await;
    }
}
