//! Pure message routing logic for MQTT events
//!
//! This module turns raw rumqttc poll results into session events.
//! It performs no I/O and holds no state.

use super::connection::{ConnAckCode, DisconnectReason};
use crate::transport::{InboundMessage, SessionEvent};
use chrono::Utc;
use rumqttc::mqttbytes;
use rumqttc::{
    ConnectionError, Event, Outgoing, Packet, Publish, StateError, SubAck, SubscribeReasonCode,
};
use tracing::trace;

/// Result of a single poll of the rumqttc event loop
#[derive(Debug)]
pub enum PollOutcome {
    Event(Event),
    Error(ConnectionError),
    /// Poll did not complete within the connect timeout
    TimedOut,
}

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route one poll outcome to a session event (pure function)
    ///
    /// Returns `None` for infrastructure traffic the session layer does not
    /// care about (PINGRESP, outgoing SUBSCRIBE and so on).
    pub fn route_poll_outcome(outcome: PollOutcome) -> Option<SessionEvent> {
        match outcome {
            PollOutcome::Event(event) => Self::route_mqtt_event(event),
            // rumqttc surfaces a refused ConnAck as an error
            PollOutcome::Error(ConnectionError::ConnectionRefused(code)) => {
                Some(SessionEvent::Connected(ConnAckCode::from(code)))
            }
            PollOutcome::Error(ConnectionError::MqttState(StateError::Deserialization(
                mqttbytes::Error::PayloadSizeLimitExceeded(size),
            ))) => Some(SessionEvent::Disconnected(DisconnectReason::PacketTooLarge(
                size,
            ))),
            PollOutcome::Error(error) => Some(SessionEvent::Disconnected(
                DisconnectReason::Network(error.to_string()),
            )),
            PollOutcome::TimedOut => Some(SessionEvent::Disconnected(
                DisconnectReason::ConnectTimeout,
            )),
        }
    }

    /// Route an MQTT event to a session event (pure function)
    pub fn route_mqtt_event(event: Event) -> Option<SessionEvent> {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                Some(SessionEvent::Connected(ConnAckCode::from(connack.code)))
            }
            Event::Incoming(Packet::Publish(publish)) => {
                Some(SessionEvent::MessageReceived(Self::inbound_message(publish)))
            }
            Event::Incoming(Packet::SubAck(suback)) => Some(Self::subscribe_ack(suback)),
            Event::Outgoing(Outgoing::Disconnect) => {
                Some(SessionEvent::Disconnected(DisconnectReason::Requested))
            }
            other => {
                trace!("Ignoring MQTT infrastructure event: {:?}", other);
                None
            }
        }
    }

    /// Stamp an incoming publish with its receipt time (pure apart from the clock)
    pub fn inbound_message(publish: Publish) -> InboundMessage {
        InboundMessage {
            topic: publish.topic,
            qos: publish.qos,
            payload: publish.payload,
            received_at: Utc::now(),
        }
    }

    /// Convert SubAck return codes into granted QoS levels (pure function)
    ///
    /// `None` marks a rejected subscription (return code 0x80).
    pub fn subscribe_ack(suback: SubAck) -> SessionEvent {
        let granted = suback
            .return_codes
            .into_iter()
            .map(|code| match code {
                SubscribeReasonCode::Success(qos) => Some(qos),
                SubscribeReasonCode::Failure => None,
            })
            .collect();

        SessionEvent::SubscribeAck {
            packet_id: suback.pkid,
            granted,
        }
    }
}
