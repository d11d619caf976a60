//! Wire format of the status messages

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Sensor output as reported to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    On,
    Off,
}

/// A status message, serialized to one of two JSON shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusMessage {
    /// `{"sensor":"on","detected_at":"2024-01-01T09:00:00+09:00"}`
    Detection {
        sensor: SensorState,
        detected_at: String,
    },
    /// `{"state":{"reported":{"sensor":"on"}}}`
    ShadowReport { state: ShadowState },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    pub reported: ReportedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedState {
    pub sensor: SensorState,
}

/// RFC3339 with whole seconds in `offset`; `Z` when the offset is zero
pub fn format_detected_at(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl StatusMessage {
    pub fn detection(sensor: SensorState, at: DateTime<Utc>, offset: FixedOffset) -> Self {
        StatusMessage::Detection {
            sensor,
            detected_at: format_detected_at(at, offset),
        }
    }

    pub fn shadow_report(sensor: SensorState) -> Self {
        StatusMessage::ShadowReport {
            state: ShadowState {
                reported: ReportedState { sensor },
            },
        }
    }

    pub fn sensor(&self) -> SensorState {
        match self {
            StatusMessage::Detection { sensor, .. } => *sensor,
            StatusMessage::ShadowReport { state } => state.reported.sensor,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
