//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc event loop. It performs the initial
//! connect, runs the receive loop on a dedicated task, and sends the
//! final DISCONNECT. All decisions are delegated to the registered
//! [`SessionObserver`].

use super::connection::{
    configure_mqtt_options, BrokerEndpoint, ConnAckCode, MqttError, SubscriptionSpec,
    REQUEST_CHANNEL_CAPACITY,
};
use super::message_handler::{MessageHandler, PollOutcome};
use crate::shutdown::ShutdownFlag;
use crate::transport::{Directive, SessionEvent, SessionObserver, SubscribeCommand, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Outgoing, Packet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on waiting for the DISCONNECT packet to be flushed
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for the receive task to exit
const RECEIVE_TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable handle that enqueues SUBSCRIBE requests
#[derive(Clone)]
pub struct MqttCommands {
    client: AsyncClient,
}

impl SubscribeCommand for MqttCommands {
    fn subscribe(&self, spec: &SubscriptionSpec) -> Result<(), MqttError> {
        self.client
            .try_subscribe(spec.topic_filter.clone(), spec.qos)
            .map_err(MqttError::SubscriptionFailed)
    }
}

/// MQTT session owning the broker connection
pub struct MqttSession {
    endpoint: BrokerEndpoint,
    connect_timeout: Duration,
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    observer: Option<Box<dyn SessionObserver>>,
    shutdown: ShutdownFlag,
    stop_tx: watch::Sender<bool>,
    receive_handle: Option<JoinHandle<EventLoop>>,
    link_up: Arc<AtomicBool>,
    disconnected: bool,
}

impl MqttSession {
    pub fn new(endpoint: BrokerEndpoint, connect_timeout: Duration, shutdown: ShutdownFlag) -> Self {
        let mqtt_options = configure_mqtt_options(&endpoint);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (stop_tx, _stop_rx) = watch::channel(false);

        Self {
            endpoint,
            connect_timeout,
            client,
            event_loop: Some(event_loop),
            observer: None,
            shutdown,
            stop_tx,
            receive_handle: None,
            link_up: Arc::new(AtomicBool::new(false)),
            disconnected: false,
        }
    }

    /// Handle used to issue SUBSCRIBE requests from the observer
    pub fn commands(&self) -> MqttCommands {
        MqttCommands {
            client: self.client.clone(),
        }
    }

    /// Register the observer driven by the receive loop; must precede `connect`
    pub fn set_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    /// Perform the initial connect and start the receive loop
    ///
    /// Returns only once a ConnAck was accepted. Any failure of this first
    /// attempt is returned as an error and no retry is scheduled.
    ///
    /// The observer and event loop stay in the session until the ConnAck,
    /// so dropping this future leaves both available to [`Self::stop`].
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let observer = self.observer.as_mut().ok_or(MqttError::NoObserver)?;
        let event_loop = self.event_loop.as_mut().ok_or(MqttError::AlreadyStarted)?;

        info!(
            "Connecting to broker {}:{}",
            self.endpoint.host, self.endpoint.port
        );
        observer.on_connecting();

        if let Err(error) = Self::wait_for_connack(event_loop, self.connect_timeout).await {
            observer.on_connect_failed(&error);
            return Err(error);
        }

        let (Some(mut observer), Some(event_loop)) = (self.observer.take(), self.event_loop.take())
        else {
            return Err(MqttError::AlreadyStarted);
        };

        self.link_up.store(true, Ordering::SeqCst);
        if let Directive::Stop = observer.on_event(SessionEvent::Connected(ConnAckCode::Accepted))
        {
            debug!("Observer stopped the session right after connect");
        }

        let stop_rx = self.stop_tx.subscribe();
        let shutdown = self.shutdown.clone();
        let connect_timeout = self.connect_timeout;
        let link_up = self.link_up.clone();

        self.receive_handle = Some(tokio::spawn(async move {
            Self::receive_loop(event_loop, observer, stop_rx, shutdown, connect_timeout, link_up)
                .await
        }));

        Ok(())
    }

    /// Poll until the first ConnAck, bounded by the connect timeout
    async fn wait_for_connack(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                        let code = ConnAckCode::from(connack.code);
                        return if code.is_success() {
                            Ok(())
                        } else {
                            Err(MqttError::ConnectionRefused(code))
                        };
                    }
                    Ok(other) => debug!("Event before ConnAck: {:?}", other),
                    Err(ConnectionError::ConnectionRefused(code)) => {
                        return Err(MqttError::ConnectionRefused(ConnAckCode::from(code)));
                    }
                    Err(error) => return Err(MqttError::ConnectionFailed(error)),
                }
            }
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// The only place that reads from the broker connection
    async fn receive_loop(
        mut event_loop: EventLoop,
        mut observer: Box<dyn SessionObserver>,
        mut stop_rx: watch::Receiver<bool>,
        shutdown: ShutdownFlag,
        connect_timeout: Duration,
        link_up: Arc<AtomicBool>,
    ) -> EventLoop {
        debug!("MQTT receive loop started");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = Self::stop_requested(&mut stop_rx, &shutdown) => break,
                outcome = Self::poll_once(&mut event_loop, link_up.load(Ordering::SeqCst), connect_timeout) => outcome,
            };

            let Some(event) = MessageHandler::route_poll_outcome(outcome) else {
                continue;
            };

            match &event {
                SessionEvent::Connected(code) => link_up.store(code.is_success(), Ordering::SeqCst),
                SessionEvent::Disconnected(_) => link_up.store(false, Ordering::SeqCst),
                _ => {}
            }

            match observer.on_event(event) {
                Directive::Continue => {}
                Directive::Reconnect { attempt, delay } => {
                    if !Self::interruptible_sleep(&mut stop_rx, &shutdown, delay).await {
                        break;
                    }
                    debug!("Starting reconnection attempt {}", attempt);
                }
                Directive::Stop => {
                    info!("MQTT receive loop stopping");
                    break;
                }
            }
        }

        if shutdown.is_set() || *stop_rx.borrow() {
            observer.on_shutdown();
        }
        debug!("MQTT receive loop stopped");
        event_loop
    }

    /// Poll once; attempts that have not produced a ConnAck are time-bounded
    async fn poll_once(event_loop: &mut EventLoop, connected: bool, timeout: Duration) -> PollOutcome {
        if connected {
            return match event_loop.poll().await {
                Ok(event) => PollOutcome::Event(event),
                Err(error) => PollOutcome::Error(error),
            };
        }

        match tokio::time::timeout(timeout, event_loop.poll()).await {
            Ok(Ok(event)) => PollOutcome::Event(event),
            Ok(Err(error)) => PollOutcome::Error(error),
            Err(_) => PollOutcome::TimedOut,
        }
    }

    /// Resolves when either a stop or the process shutdown is requested
    async fn stop_requested(stop_rx: &mut watch::Receiver<bool>, shutdown: &ShutdownFlag) {
        tokio::select! {
            _ = stop_rx.wait_for(|stop| *stop) => {}
            _ = shutdown.wait() => {}
        }
    }

    /// Returns false if interrupted by a stop request
    async fn interruptible_sleep(
        stop_rx: &mut watch::Receiver<bool>,
        shutdown: &ShutdownFlag,
        delay: Duration,
    ) -> bool {
        if delay.is_zero() {
            return !(shutdown.is_set() || *stop_rx.borrow());
        }

        tokio::select! {
            _ = Self::stop_requested(stop_rx, shutdown) => {
                info!("Shutdown signal received during reconnection delay, stopping");
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Stop the receive loop and reclaim the event loop
    pub async fn stop(&mut self) {
        self.stop_tx.send_replace(true);

        let Some(handle) = self.receive_handle.take() else {
            // Never got past connect; the observer is still ours to notify
            if let Some(observer) = self.observer.as_mut() {
                observer.on_shutdown();
            }
            return;
        };

        match tokio::time::timeout(RECEIVE_TASK_JOIN_TIMEOUT, handle).await {
            Ok(Ok(event_loop)) => {
                debug!("Receive task shut down gracefully");
                self.event_loop = Some(event_loop);
            }
            Ok(Err(e)) => warn!("Receive task ended with error: {}", e),
            Err(_) => warn!("Receive task did not stop within {:?}", RECEIVE_TASK_JOIN_TIMEOUT),
        }
    }

    /// Send DISCONNECT if the link is up; safe to call more than once
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if self.disconnected {
            debug!("Disconnect already performed");
            return Ok(());
        }
        self.disconnected = true;

        self.stop().await;

        let Some(mut event_loop) = self.event_loop.take() else {
            debug!("No event loop available, skipping DISCONNECT");
            return Ok(());
        };

        if !self.link_up.swap(false, Ordering::SeqCst) {
            info!("No active broker connection, skipping DISCONNECT");
            return Ok(());
        }

        self.client
            .try_disconnect()
            .map_err(MqttError::DisconnectFailed)?;

        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(other) => debug!("Discarding event during disconnect: {:?}", other),
                    Err(e) => {
                        debug!("Connection closed during disconnect: {}", e);
                        return false;
                    }
                }
            }
        })
        .await;

        match flushed {
            Ok(true) => info!("Disconnected from MQTT broker"),
            Ok(false) => warn!("Connection closed before DISCONNECT was sent"),
            Err(_) => warn!(
                "DISCONNECT not flushed within {:?}",
                DISCONNECT_FLUSH_TIMEOUT
            ),
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MqttSession {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttSession::connect(self).await
    }

    async fn stop(&mut self) {
        MqttSession::stop(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttSession::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        MqttSession::is_connected(self)
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.receive_handle.take() {
            handle.abort();
        }
    }
}
