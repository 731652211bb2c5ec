//! MQTT Logger Service
//!
//! A long-running MQTT subscriber that records every received message to
//! stdout and to a size-rotating log file, reconnecting and resubscribing
//! whenever the broker connection drops.
//!
//! # Overview
//!
//! - [`config`] - TOML configuration with defaults and validation
//! - [`transport`] - MQTT session, event routing and connection state machine
//! - [`agent`] - Dispatcher, subscription manager, message sink, lifecycle
//! - [`observability`] - Line-formatted logging to stdout and rotating file
//! - [`shutdown`] - One-shot shutdown flag and signal coordination
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_logger::{LoggerConfig, LoggerService, ShutdownFlag};
//!
//! # tokio_test::block_on(async {
//! let config = LoggerConfig::default();
//! config.validate()?;
//!
//! let shutdown = ShutdownFlag::new();
//! let mut service = LoggerService::from_config(&config, shutdown.clone());
//! service.run().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod shutdown;
pub mod testing;
pub mod transport;

pub use agent::{LoggerService, MessageSink, SinkStats};
pub use config::*;
pub use error::{ServiceError, ServiceResult};
pub use shutdown::{ShutdownCoordinator, ShutdownFlag, TerminationSignal};
pub use transport::mqtt::{ConnectionState, MqttSession};
