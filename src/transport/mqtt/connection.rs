//! Pure connection state management for the MQTT session
//!
//! This module contains the connection-level value types, the error
//! taxonomy of the transport, option construction for rumqttc and the
//! reconnection backoff policy. Nothing in here performs I/O.

use rand::Rng;
use rumqttc::{ClientError, ConnectReturnCode, ConnectionError, MqttOptions, QoS};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Largest remaining length an MQTT 3.1.1 packet can declare
pub const MQTT_MAX_PACKET_SIZE: usize = 268_435_455;

/// Largest outbound packet (subscribe/disconnect only, kept small)
pub const MAX_OUTGOING_PACKET_SIZE: usize = 64 * 1024;

/// Request channel capacity between the command handle and the event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Lifecycle state of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    Disconnected,
    /// A connect attempt is in flight or scheduled
    Connecting,
    /// ConnAck accepted; subscription has been (re)issued
    Connected,
    /// Terminal: shutdown requested, no further transitions
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::ShuttingDown => "ShuttingDown",
        };
        f.write_str(name)
    }
}

/// Username/password pair; the password never appears in Debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Where and how to reach the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keepalive: Duration,
    /// Largest inbound packet accepted from the broker
    pub max_packet_size: usize,
}

/// The single subscription this service maintains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub topic_filter: String,
    pub qos: QoS,
}

/// Return code carried by a ConnAck (MQTT 3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAckCode {
    Accepted,
    RefusedProtocolVersion,
    BadClientId,
    ServiceUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl ConnAckCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnAckCode::Accepted)
    }

    /// Numeric return code as sent on the wire
    pub fn code(&self) -> u8 {
        match self {
            ConnAckCode::Accepted => 0,
            ConnAckCode::RefusedProtocolVersion => 1,
            ConnAckCode::BadClientId => 2,
            ConnAckCode::ServiceUnavailable => 3,
            ConnAckCode::BadCredentials => 4,
            ConnAckCode::NotAuthorized => 5,
        }
    }
}

impl From<ConnectReturnCode> for ConnAckCode {
    fn from(code: ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::Success => ConnAckCode::Accepted,
            ConnectReturnCode::RefusedProtocolVersion => ConnAckCode::RefusedProtocolVersion,
            ConnectReturnCode::BadClientId => ConnAckCode::BadClientId,
            ConnectReturnCode::ServiceUnavailable => ConnAckCode::ServiceUnavailable,
            ConnectReturnCode::BadUserNamePassword => ConnAckCode::BadCredentials,
            ConnectReturnCode::NotAuthorized => ConnAckCode::NotAuthorized,
        }
    }
}

impl fmt::Display for ConnAckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.code(), self)
    }
}

/// Why a connection ended or a connect attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We sent DISCONNECT ourselves
    Requested,
    /// Socket error, broker closed the stream, keepalive timeout
    Network(String),
    /// Connect attempt did not complete within the connect timeout
    ConnectTimeout,
    /// Broker sent a packet larger than the configured inbound limit
    PacketTooLarge(usize),
}

impl DisconnectReason {
    pub fn is_success(&self) -> bool {
        matches!(self, DisconnectReason::Requested)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("client requested disconnect"),
            DisconnectReason::Network(detail) => write!(f, "network error: {detail}"),
            DisconnectReason::ConnectTimeout => f.write_str("connect attempt timed out"),
            DisconnectReason::PacketTooLarge(size) => {
                write!(f, "inbound packet of {size} bytes exceeds the size limit")
            }
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] ConnectionError),
    #[error("Connection refused by broker with code {0}")]
    ConnectionRefused(ConnAckCode),
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] ClientError),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] ClientError),
    #[error("No session observer registered before connect")]
    NoObserver,
    #[error("Event loop already started")]
    AlreadyStarted,
}

/// Build rumqttc options from the broker endpoint
pub fn configure_mqtt_options(endpoint: &BrokerEndpoint) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(endpoint.client_id.clone(), endpoint.host.clone(), endpoint.port);

    mqtt_options.set_keep_alive(endpoint.keepalive);

    // Subscriptions are reissued on every ConnAck, so a clean session is fine
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(endpoint.max_packet_size, MAX_OUTGOING_PACKET_SIZE);

    if let Some(credentials) = &endpoint.credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    mqtt_options
}

/// Numeric QoS level for display
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Reconnection backoff policy
///
/// Attempt 1 after a drop is immediate when `immediate_first_retry` is set.
/// Later attempts grow geometrically from `initial_delay` up to `max_delay`.
/// The attempt counter only resets once a connection has proven healthy:
/// a message was delivered on it, or it stayed up for `stable_after`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub immediate_first_retry: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the base delay used as random spread in either direction
    pub jitter: f64,
    pub stable_after: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            immediate_first_retry: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            stable_after: Duration::from_secs(10),
        }
    }
}

impl ReconnectConfig {
    /// Deterministic delay before the given 1-based attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let exponent = if self.immediate_first_retry {
            if attempt == 1 {
                return Duration::ZERO;
            }
            attempt - 2
        } else {
            attempt - 1
        };

        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = initial_ms * self.multiplier.powi(exponent.min(64) as i32);
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Delay before the given attempt with random jitter applied
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() || self.jitter <= 0.0 {
            return base;
        }

        let base_ms = base.as_millis() as f64;
        let spread = base_ms * self.jitter;
        let offset = rand::rng().random_range(-spread..=spread);
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis((base_ms + offset).clamp(0.0, max_ms) as u64)
    }
}
