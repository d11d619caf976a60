//! Publisher behavior tests
//!
//! Payloads must match the wire templates byte for byte, and timestamps must
//! reflect when the edge happened.

use chrono::{DateTime, Utc};
use iot_motion_sensor::publisher::{PublishTrigger, Publisher, SensorState};
use iot_motion_sensor::sensor::{MotionEvent, MotionKind, MotionListener};
use iot_motion_sensor::testing::MockTransport;
use serde_json::Value;
use std::sync::Arc;

use test_helpers::{shadow_config, telemetry_config};

#[tokio::test]
async fn test_started_edge_publishes_on_with_current_timestamp() {
    let transport = Arc::new(MockTransport::new());
    let publisher = Publisher::for_config(transport.clone(), &telemetry_config()).unwrap();

    let before = Utc::now();
    publisher.on_motion(MotionEvent::now(MotionKind::Started)).await;

    let published = transport.get_published_messages().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "sensors/motion");

    let body: Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(body["sensor"], "on");
    assert_eq!(body.as_object().unwrap().len(), 2);

    let detected_at = body["detected_at"].as_str().unwrap();
    assert!(detected_at.ends_with("+09:00"), "got: {detected_at}");
    let detected_at = DateTime::parse_from_rfc3339(detected_at).unwrap();
    let skew = detected_at.with_timezone(&Utc) - before;
    assert!(
        skew.num_seconds().abs() <= 2,
        "timestamp {detected_at} too far from {before}"
    );
}

#[tokio::test]
async fn test_stopped_edge_on_shadow_is_exact() {
    let transport = Arc::new(MockTransport::new());
    let publisher = Publisher::for_config(transport.clone(), &shadow_config()).unwrap();

    publisher.on_motion(MotionEvent::now(MotionKind::Stopped)).await;

    assert_eq!(
        transport.get_published_payloads().await,
        vec![r#"{"state":{"reported":{"sensor":"off"}}}"#.to_string()]
    );
    assert_eq!(
        transport.get_published_messages().await[0].0,
        "$aws/things/pir-01/shadow/update"
    );
}

#[tokio::test]
async fn test_configured_offset_is_used() {
    let mut config = telemetry_config();
    config.sensor.utc_offset = "+00:00".to_string();
    let transport = Arc::new(MockTransport::new());
    let publisher = Publisher::for_config(transport.clone(), &config).unwrap();

    publisher
        .publish_state(SensorState::Off, Utc::now(), PublishTrigger::Heartbeat)
        .await
        .unwrap();

    let payloads = transport.get_published_payloads().await;
    let body: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(body["sensor"], "off");
    assert!(body["detected_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_failed_publish_is_not_retried() {
    let transport = Arc::new(MockTransport::with_failure());
    let publisher = Publisher::for_config(transport.clone(), &shadow_config()).unwrap();

    publisher.on_motion(MotionEvent::now(MotionKind::Started)).await;
    publisher.on_motion(MotionEvent::now(MotionKind::Stopped)).await;

    assert_eq!(transport.publish_attempts(), 2);
    assert!(transport.get_published_messages().await.is_empty());
}

#[tokio::test]
async fn test_publishing_resumes_after_transient_failure() {
    let transport = Arc::new(MockTransport::new());
    let publisher = Publisher::for_config(transport.clone(), &shadow_config()).unwrap();

    transport.set_failing(true);
    publisher.on_motion(MotionEvent::now(MotionKind::Started)).await;
    transport.set_failing(false);
    publisher.on_motion(MotionEvent::now(MotionKind::Stopped)).await;

    assert_eq!(
        transport.get_published_payloads().await,
        vec![r#"{"state":{"reported":{"sensor":"off"}}}"#.to_string()]
    );
}
