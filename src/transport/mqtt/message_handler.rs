//! Pure message routing for MQTT events
//!
//! This module turns rumqttc events into routing decisions the client acts
//! on, and holds the handler invoked for inbound publishes.

use super::ack::AckOutcome;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, PubAckReason};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::sync::Arc;
use tracing::info;

/// Callback for any publish the broker delivers to this client
pub type InboundHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Handler that logs topic and payload of every inbound message
pub fn default_inbound_handler() -> InboundHandler {
    Arc::new(|topic: &str, payload: &[u8]| {
        info!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "Received message"
        );
    })
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match &connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    pkid: puback.pkid,
                    outcome: Self::puback_outcome(&puback.reason),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Interpret a PubAck reason code (pure function)
    pub fn puback_outcome(reason: &PubAckReason) -> AckOutcome {
        match reason {
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => AckOutcome::Delivered,
            other => AckOutcome::Rejected(format!("{other:?}")),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish
    ConnectionAcknowledged,
    /// Broker answered CONNECT with a failure code
    ConnectionRefused(String),
    /// Message received from the broker
    MessageReceived { topic: String, payload: Vec<u8> },
    /// A publish was written to the socket with this packet id
    PublishSent(u16),
    /// Broker answered a QoS 1 publish
    PublishAcknowledged { pkid: u16, outcome: AckOutcome },
    /// MQTT broker disconnected
    Disconnected,
    /// Our DISCONNECT went out; the event loop is done
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Other outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, DisconnectReasonCode, PubAck, Publish};
    use rumqttc::v5::mqttbytes::QoS;
    use std::sync::Mutex;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );

        let refused = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&refused),
            EventRoute::ConnectionRefused(_)
        ));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_route_inbound_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("$aws/things/pir/shadow/update/accepted"),
            pkid: 1,
            payload: Bytes::from("{}"),
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::MessageReceived {
                topic: "$aws/things/pir/shadow/update/accepted".to_string(),
                payload: b"{}".to_vec(),
            }
        );
    }

    #[test]
    fn test_route_outgoing_publish() {
        let sent = Event::Outgoing(Outgoing::Publish(12));
        assert_eq!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::PublishSent(12)
        );

        let ping = Event::Outgoing(Outgoing::PingReq);
        assert_eq!(
            MessageHandler::route_mqtt_event(&ping),
            EventRoute::OutgoingEvent
        );

        let bye = Event::Outgoing(Outgoing::Disconnect);
        assert_eq!(
            MessageHandler::route_mqtt_event(&bye),
            EventRoute::DisconnectSent
        );
    }

    #[test]
    fn test_route_puback() {
        let ack = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 4,
            reason: PubAckReason::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&ack),
            EventRoute::PublishAcknowledged {
                pkid: 4,
                outcome: AckOutcome::Delivered,
            }
        );
    }

    #[test]
    fn test_puback_outcomes() {
        assert_eq!(
            MessageHandler::puback_outcome(&PubAckReason::NoMatchingSubscribers),
            AckOutcome::Delivered
        );
        assert!(matches!(
            MessageHandler::puback_outcome(&PubAckReason::NotAuthorized),
            AckOutcome::Rejected(_)
        ));
        assert!(matches!(
            MessageHandler::puback_outcome(&PubAckReason::QuotaExceeded),
            AckOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_custom_inbound_handler_receives_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: InboundHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            sink.lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
        });

        handler("a/b", b"hello");
        default_inbound_handler()("a/b", b"ignored");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a/b".to_string(), b"hello".to_vec())]
        );
    }
}
