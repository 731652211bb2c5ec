//! Service lifecycle management
//!
//! Startup is a single connect attempt; any failure there is fatal. Once
//! connected the service runs until the shutdown flag is set, then stops
//! the receive loop and disconnects exactly once.

use super::dispatcher::EventDispatcher;
use super::sink::{MessageSink, SinkStats};
use super::subscription::SubscriptionManager;
use crate::config::LoggerConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::shutdown::ShutdownFlag;
use crate::transport::mqtt::{ConnectionState, MqttSession, ReconnectionController};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Logger service with dependency-injected transport
pub struct LoggerService<T>
where
    T: Transport + 'static,
{
    transport: T,
    shutdown: ShutdownFlag,
    state_rx: watch::Receiver<ConnectionState>,
    sink: MessageSink,
    stopped: bool,
}

impl LoggerService<MqttSession> {
    /// Wire the MQTT session, controller, subscription and sink together
    pub fn from_config(config: &LoggerConfig, shutdown: ShutdownFlag) -> Self {
        let mut session =
            MqttSession::new(config.broker_endpoint(), config.connect_timeout(), shutdown.clone());

        let controller = ReconnectionController::new(config.reconnect_config(), shutdown.clone());
        let state_rx = controller.subscribe_state();
        let subscriptions =
            SubscriptionManager::new(config.subscription_spec(), Arc::new(session.commands()));
        let sink = MessageSink::new();

        session.set_observer(Box::new(EventDispatcher::new(
            controller,
            subscriptions,
            sink.clone(),
        )));

        Self::new(session, shutdown, state_rx, sink)
    }
}

impl<T> LoggerService<T>
where
    T: Transport + 'static,
{
    pub fn new(
        transport: T,
        shutdown: ShutdownFlag,
        state_rx: watch::Receiver<ConnectionState>,
        sink: MessageSink,
    ) -> Self {
        Self {
            transport,
            shutdown,
            state_rx,
            sink,
            stopped: false,
        }
    }

    /// Observe connection state changes
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> SinkStats {
        self.sink.stats()
    }

    /// Initial connect; an error here means the service must exit
    pub async fn start(&mut self) -> ServiceResult<()> {
        self.transport
            .connect()
            .await
            .map_err(ServiceError::transport)
    }

    /// Stop the receive loop and disconnect; later calls are no-ops
    pub async fn shutdown(&mut self) -> ServiceResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        info!("Stopping MQTT client...");
        self.transport.stop().await;
        let result = self
            .transport
            .disconnect()
            .await
            .map_err(ServiceError::transport);
        if let Err(e) = &result {
            warn!("Disconnect failed: {}", e);
        }

        let stats = self.sink.stats();
        info!(
            "Logged {} messages ({} undecodable)",
            stats.received, stats.decode_failures
        );
        info!("MQTT Logger Service stopped");
        result
    }

    /// Connect, run until the shutdown flag is set, then tear down
    pub async fn run(&mut self) -> ServiceResult<()> {
        let shutdown = self.shutdown.clone();

        let started = tokio::select! {
            started = self.start() => Some(started),
            _ = shutdown.wait() => None,
        };

        match started {
            Some(result) => result?,
            None => {
                info!("Shutdown requested before the broker connection was established");
                return self.shutdown().await;
            }
        }

        shutdown.wait().await;
        self.shutdown().await
    }
}
