//! Service components driven by the MQTT session
//!
//! The dispatcher receives session events, the reconnection controller
//! tracks the connection lifecycle, the subscription manager reissues the
//! subscription after every ConnAck, and the sink logs each message.

pub mod dispatcher;
pub mod lifecycle;
pub mod sink;
pub mod subscription;

pub use dispatcher::EventDispatcher;
pub use lifecycle::LoggerService;
pub use sink::{format_message, MessageSink, SinkError, SinkStats};
pub use subscription::SubscriptionManager;
