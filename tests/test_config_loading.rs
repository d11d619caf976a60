//! Configuration loading and validation tests
//!
//! Covers both command-line surfaces, the optional TOML file and the
//! derivation of the shadow update topic.

use clap::Parser;
use iot_motion_sensor::cli::{ShadowArgs, TelemetryArgs};
use iot_motion_sensor::config::{shadow_update_topic, ConfigError, PublishTarget, SensorConfig};
use proptest::prelude::*;

use test_helpers::{path_of, temp_file};

#[test]
fn test_config_loads_from_toml_with_defaults() {
    let file = temp_file(
        r#"
[broker]
host_name = "xxxx-ats.iot.ap-northeast-1.amazonaws.com"
client_id = "pi-01"

[tls]
ca_certificate = "certs/AmazonRootCA1.pem"
client_certificate = "certs/device.pem.crt"
private_key = "certs/device.pem.key"

[target]
kind = "shadow"
thing_name = "pir-01"
"#,
    );

    let config = SensorConfig::load_from_file(file.path()).unwrap();

    assert_eq!(
        config.broker.broker_url(),
        "ssl://xxxx-ats.iot.ap-northeast-1.amazonaws.com:8883"
    );
    assert_eq!(config.broker.qos, 1);
    assert_eq!(config.broker.disconnect_grace_ms, 250);
    assert_eq!(config.sensor.pin, 12);
    assert_eq!(config.sensor.name, "motionBot");
    assert_eq!(config.sensor.utc_offset, "+09:00");
    assert_eq!(config.heartbeat.interval_secs, 15);
    assert!(!config.tls.verify_broker);
    assert_eq!(config.publish_topic(), "$aws/things/pir-01/shadow/update");
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = SensorConfig::load_from_file(std::path::Path::new("/nonexistent/sensor.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = temp_file(
        r#"
[broker]
qos = 2

[target]
kind = "topic"
endpoint = "sensors/motion"
"#,
    );

    let result = SensorConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_flags_override_config_file() {
    let file = temp_file(
        r#"
[broker]
host_name = "from-file.example.com"
client_id = "file-client"

[sensor]
pin = 4

[target]
kind = "topic"
endpoint = "file/topic"
"#,
    );

    let config = TelemetryArgs::try_parse_from([
        "iot-motion-sensor",
        "--config",
        &path_of(&file),
        "--client-id",
        "flag-client",
        "--heartbeat-interval",
        "30",
    ])
    .unwrap()
    .into_config()
    .unwrap();

    assert_eq!(config.broker.host_name, "from-file.example.com");
    assert_eq!(config.broker.client_id, "flag-client");
    assert_eq!(config.sensor.pin, 4);
    assert_eq!(config.heartbeat.interval_secs, 30);
    assert_eq!(config.publish_topic(), "file/topic");
}

#[test]
fn test_shadow_agent_keeps_its_target_kind_with_a_topic_file() {
    let file = temp_file(
        r#"
[target]
kind = "topic"
endpoint = "file/topic"
"#,
    );

    let config = ShadowArgs::try_parse_from([
        "iot-motion-shadow",
        "--config",
        &path_of(&file),
        "--thing-name",
        "pir-02",
    ])
    .unwrap()
    .into_config()
    .unwrap();

    assert_eq!(
        config.target,
        PublishTarget::Shadow {
            thing_name: "pir-02".to_string()
        }
    );
}

#[test]
fn test_effective_config_renders_and_reparses() {
    let config = ShadowArgs::try_parse_from([
        "iot-motion-shadow",
        "--hostName",
        "broker.example.com",
        "--thing-name",
        "pir-01",
        "--verify-broker",
    ])
    .unwrap()
    .into_config()
    .unwrap();

    let rendered = config.to_toml().unwrap();
    assert!(rendered.contains("thing_name = \"pir-01\""));
    assert_eq!(SensorConfig::from_toml(&rendered).unwrap(), config);
}

#[test]
fn test_unknown_flag_is_a_usage_error() {
    let err = TelemetryArgs::try_parse_from(["iot-motion-sensor", "--thing-name", "pir-01"])
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

proptest! {
    #[test]
    fn shadow_topic_wraps_any_thing_name(thing in "[A-Za-z0-9][A-Za-z0-9:_-]{0,63}") {
        let topic = shadow_update_topic(&thing);
        prop_assert_eq!(&topic, &format!("$aws/things/{thing}/shadow/update"));

        let config =
            ShadowArgs::try_parse_from(["iot-motion-shadow", "--thing-name", thing.as_str()])
                .unwrap()
                .into_config()
                .unwrap();
        prop_assert_eq!(config.publish_topic(), topic);
    }
}
