//! Transport layer for the broker session
//!
//! This module defines the seams between the I/O-owning MQTT session and
//! the service logic that reacts to it: the events a session emits, the
//! directives an observer answers with, and the traits used for dependency
//! injection in tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rumqttc::QoS;

pub mod mqtt;

use mqtt::{ConnAckCode, DisconnectReason, MqttError, SubscriptionSpec};

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Events emitted by the receive loop, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// ConnAck arrived (or a connect attempt was refused)
    Connected(ConnAckCode),
    /// Connection lost, connect attempt failed, or clean disconnect
    Disconnected(DisconnectReason),
    /// Publish received on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker answered a SUBSCRIBE; `None` marks a rejected filter
    SubscribeAck {
        packet_id: u16,
        granted: Vec<Option<QoS>>,
    },
}

/// What the receive loop should do after an event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep polling
    Continue,
    /// Wait `delay`, then poll again (rumqttc reconnects on the next poll)
    Reconnect {
        attempt: u32,
        delay: std::time::Duration,
    },
    /// Leave the receive loop
    Stop,
}

/// Callback interface invoked from the receive loop
///
/// All methods run on the receive task, one at a time, so implementations
/// see events strictly in order and never concurrently.
pub trait SessionObserver: Send {
    /// A connect attempt is about to be made
    fn on_connecting(&mut self);

    /// The initial connect attempt failed; no retry follows
    fn on_connect_failed(&mut self, error: &MqttError);

    /// Handle one session event
    fn on_event(&mut self, event: SessionEvent) -> Directive;

    /// The receive loop is exiting because shutdown was requested
    fn on_shutdown(&mut self);
}

/// Non-blocking subscribe request
///
/// Implementations must only enqueue the request; they are called from the
/// receive loop and may not wait on the broker.
pub trait SubscribeCommand: Send + Sync {
    fn subscribe(&self, spec: &SubscriptionSpec) -> Result<(), MqttError>;
}

/// Transport trait for the broker session
///
/// This trait provides an abstraction over the MQTT session to enable
/// dependency injection and testing of the service lifecycle.
#[async_trait::async_trait]
pub trait Transport: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Perform the initial connect and start the receive loop
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Stop the receive loop and wait for it to exit
    async fn stop(&mut self);

    /// Send DISCONNECT if a connection is up; idempotent
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;
}
