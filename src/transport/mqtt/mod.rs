//! MQTT session implementation for the logger service
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection types, options and backoff policy
//! - [`message_handler`] - Pure routing of rumqttc events to session events
//! - [`reconnect`] - Connection lifecycle state machine
//! - [`client`] - Impure I/O operations and the receive loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_logger::shutdown::ShutdownFlag;
//! use mqtt_logger::transport::mqtt::connection::MQTT_MAX_PACKET_SIZE;
//! use mqtt_logger::transport::mqtt::{BrokerEndpoint, MqttSession};
//! use std::time::Duration;
//!
//! let endpoint = BrokerEndpoint {
//!     host: "localhost".to_string(),
//!     port: 1883,
//!     client_id: "mqtt-logger-service".to_string(),
//!     credentials: None,
//!     keepalive: Duration::from_secs(60),
//!     max_packet_size: MQTT_MAX_PACKET_SIZE,
//! };
//!
//! let session = MqttSession::new(endpoint, Duration::from_secs(10), ShutdownFlag::new());
//! let commands = session.commands();
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod reconnect;

// Re-export public types for convenience
pub use client::{MqttCommands, MqttSession};
pub use connection::{
    configure_mqtt_options, qos_level, BrokerEndpoint, ConnAckCode, ConnectionState, Credentials,
    DisconnectReason, MqttError, ReconnectConfig, SubscriptionSpec,
};
pub use message_handler::{MessageHandler, PollOutcome};
pub use reconnect::{ReconnectionController, ReconnectionDecision, ReconnectionPolicy, Transition};
