//! Connection lifecycle state machine and reconnection decisions
//!
//! [`ReconnectionPolicy`] holds the pure decision functions.
//! [`ReconnectionController`] applies them to the single owned
//! [`ConnectionState`] and publishes every change on a watch channel.

use super::connection::{ConnAckCode, ConnectionState, DisconnectReason, ReconnectConfig};
use crate::shutdown::ShutdownFlag;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Decision result for reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Outcome of applying an event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Just entered Connected; the subscription must be (re)issued
    EnteredConnected,
    /// Entered Connecting for another attempt
    Reconnect { attempt: u32, delay: Duration },
    /// No further attempts will be made
    Stop,
    /// Event has no effect in the current state
    Ignored,
}

/// Pure reconnection decision logic
pub struct ReconnectionPolicy;

impl ReconnectionPolicy {
    /// Determine if reconnection should be attempted (pure function)
    ///
    /// Retries are unlimited; only shutdown aborts them.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: config.delay_for_attempt(attempt),
        }
    }

    /// Check if a transition between two states is part of the lifecycle (pure function)
    pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, ShuttingDown)
                | (Connecting, ShuttingDown)
                | (Connected, ShuttingDown)
        )
    }
}

/// Owner of the connection state
///
/// Only the receive loop drives this controller, so transitions are applied
/// sequentially. Other tasks observe the state through [`Self::subscribe_state`].
///
/// An accepted ConnAck alone does not reset the backoff. Only a delivered
/// message or a link that stayed up for `stable_after` does.
#[derive(Debug)]
pub struct ReconnectionController {
    state_tx: watch::Sender<ConnectionState>,
    config: ReconnectConfig,
    shutdown: ShutdownFlag,
    attempts: u32,
    connected_since: Option<Instant>,
}

impl ReconnectionController {
    pub fn new(config: ReconnectConfig, shutdown: ShutdownFlag) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            state_tx,
            config,
            shutdown,
            attempts: 0,
            connected_since: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Reconnect attempts since the connection last proved healthy
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A message arrived, so the current connection is healthy
    pub fn on_message(&mut self) {
        if self.state() == ConnectionState::Connected && self.attempts > 0 {
            debug!("Message delivered, resetting reconnect backoff");
            self.attempts = 0;
        }
    }

    fn link_was_stable(&self) -> bool {
        self.connected_since
            .is_some_and(|since| since.elapsed() >= self.config.stable_after)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous == next {
            return;
        }
        if ReconnectionPolicy::is_valid_transition(previous, next) {
            debug!("Connection state: {} -> {}", previous, next);
        } else {
            warn!("Unexpected connection state change: {} -> {}", previous, next);
        }
    }

    /// Disconnected -> Connecting for the initial attempt
    pub fn begin_connect(&mut self) -> bool {
        match self.state() {
            ConnectionState::Disconnected if !self.shutdown.is_set() => {
                self.set_state(ConnectionState::Connecting);
                true
            }
            _ => false,
        }
    }

    /// Initial attempt failed; startup treats this as fatal
    pub fn connect_failed(&mut self) {
        if self.state() == ConnectionState::Connecting {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Apply a ConnAck (successful or refused)
    pub fn on_connack(&mut self, code: ConnAckCode) -> Transition {
        match self.state() {
            ConnectionState::Connecting if code.is_success() => {
                self.set_state(ConnectionState::Connected);
                self.connected_since = Some(Instant::now());
                info!("Connected to MQTT broker successfully");
                Transition::EnteredConnected
            }
            ConnectionState::Connecting => {
                self.set_state(ConnectionState::Disconnected);
                error!("Connection failed with code {}", code);
                self.schedule_retry()
            }
            ConnectionState::ShuttingDown => Transition::Ignored,
            state => {
                warn!("Unexpected ConnAck {} while {}", code, state);
                Transition::Ignored
            }
        }
    }

    /// Apply a lost connection or failed connect attempt
    pub fn on_disconnected(&mut self, reason: &DisconnectReason) -> Transition {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting if reason.is_success() => {
                self.connected_since = None;
                self.set_state(ConnectionState::Disconnected);
                info!("Disconnected from MQTT broker");
                Transition::Stop
            }
            ConnectionState::Connected => {
                if self.link_was_stable() {
                    self.attempts = 0;
                }
                self.connected_since = None;
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    "Unexpected disconnection ({}). Will attempt to reconnect.",
                    reason
                );
                self.schedule_retry()
            }
            ConnectionState::Connecting => {
                self.set_state(ConnectionState::Disconnected);
                warn!("Reconnection attempt {} failed: {}", self.attempts, reason);
                self.schedule_retry()
            }
            ConnectionState::Disconnected | ConnectionState::ShuttingDown => Transition::Ignored,
        }
    }

    /// Any state -> ShuttingDown. Returns `false` if already shutting down.
    pub fn shut_down(&mut self) -> bool {
        if self.state() == ConnectionState::ShuttingDown {
            return false;
        }
        self.set_state(ConnectionState::ShuttingDown);
        true
    }

    /// From Disconnected: either stay put (shutdown) or move to Connecting
    fn schedule_retry(&mut self) -> Transition {
        match ReconnectionPolicy::should_attempt_reconnection(
            self.attempts,
            &self.config,
            self.shutdown.is_set(),
        ) {
            ReconnectionDecision::Proceed { attempt, delay } => {
                self.attempts = attempt;
                self.set_state(ConnectionState::Connecting);
                info!(
                    "Reconnection attempt {} scheduled in {}ms",
                    attempt,
                    delay.as_millis()
                );
                Transition::Reconnect { attempt, delay }
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown requested, not reconnecting");
                Transition::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (ReconnectionController, ShutdownFlag) {
        let shutdown = ShutdownFlag::new();
        let config = ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        };
        (ReconnectionController::new(config, shutdown.clone()), shutdown)
    }

    fn connected() -> (ReconnectionController, ShutdownFlag) {
        let (mut controller, shutdown) = controller();
        assert!(controller.begin_connect());
        assert_eq!(
            controller.on_connack(ConnAckCode::Accepted),
            Transition::EnteredConnected
        );
        (controller, shutdown)
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        };

        assert_eq!(
            ReconnectionPolicy::should_attempt_reconnection(0, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            ReconnectionPolicy::should_attempt_reconnection(1, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(
            ReconnectionPolicy::should_attempt_reconnection(1000, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_valid_transitions() {
        use ConnectionState::*;
        assert!(ReconnectionPolicy::is_valid_transition(Connecting, Connected));
        assert!(ReconnectionPolicy::is_valid_transition(Connected, ShuttingDown));
        assert!(!ReconnectionPolicy::is_valid_transition(Disconnected, Connected));
        assert!(!ReconnectionPolicy::is_valid_transition(ShuttingDown, Connecting));
    }

    #[test]
    fn test_initial_connect() {
        let (mut controller, _) = controller();
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        assert!(controller.begin_connect());
        assert_eq!(controller.state(), ConnectionState::Connecting);

        assert_eq!(
            controller.on_connack(ConnAckCode::Accepted),
            Transition::EnteredConnected
        );
        assert_eq!(controller.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_initial_connect_failure_returns_to_disconnected() {
        let (mut controller, _) = controller();
        controller.begin_connect();
        controller.connect_failed();
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_unexpected_disconnect_schedules_immediate_retry() {
        let (mut controller, _) = connected();

        let transition =
            controller.on_disconnected(&DisconnectReason::Network("reset".to_string()));
        assert_eq!(
            transition,
            Transition::Reconnect {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(controller.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_failed_attempts_back_off_until_message_delivered() {
        let (mut controller, _) = connected();
        controller.on_disconnected(&DisconnectReason::Network("reset".to_string()));

        let second = controller.on_disconnected(&DisconnectReason::ConnectTimeout);
        assert_eq!(
            second,
            Transition::Reconnect {
                attempt: 2,
                delay: Duration::from_millis(500)
            }
        );

        let third = controller.on_connack(ConnAckCode::ServiceUnavailable);
        assert_eq!(
            third,
            Transition::Reconnect {
                attempt: 3,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(controller.attempts(), 3);

        assert_eq!(
            controller.on_connack(ConnAckCode::Accepted),
            Transition::EnteredConnected
        );
        assert_eq!(controller.attempts(), 3);

        controller.on_message();
        assert_eq!(controller.attempts(), 0);
    }

    #[test]
    fn test_drop_right_after_connack_keeps_backing_off() {
        let (mut controller, _) = connected();
        let reset = DisconnectReason::PacketTooLarge(4096);

        let mut delays = Vec::new();
        for _ in 0..4 {
            match controller.on_disconnected(&reset) {
                Transition::Reconnect { delay, .. } => delays.push(delay),
                other => panic!("Expected Reconnect, got {other:?}"),
            }
            controller.on_connack(ConnAckCode::Accepted);
        }

        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
        assert_eq!(controller.attempts(), 4);
    }

    #[test]
    fn test_stable_link_resets_backoff_on_drop() {
        let shutdown = ShutdownFlag::new();
        let config = ReconnectConfig {
            jitter: 0.0,
            stable_after: Duration::ZERO,
            ..Default::default()
        };
        let mut controller = ReconnectionController::new(config, shutdown);
        controller.begin_connect();
        controller.on_connack(ConnAckCode::Accepted);

        let reset = DisconnectReason::Network("reset".to_string());
        for _ in 0..3 {
            assert_eq!(
                controller.on_disconnected(&reset),
                Transition::Reconnect {
                    attempt: 1,
                    delay: Duration::ZERO
                }
            );
            controller.on_connack(ConnAckCode::Accepted);
        }
    }

    #[test]
    fn test_message_outside_connected_keeps_attempts() {
        let (mut controller, _) = connected();
        controller.on_disconnected(&DisconnectReason::Network("reset".to_string()));
        assert_eq!(controller.state(), ConnectionState::Connecting);

        controller.on_message();
        assert_eq!(controller.attempts(), 1);
    }

    #[test]
    fn test_clean_disconnect_stops() {
        let (mut controller, _) = connected();
        assert_eq!(
            controller.on_disconnected(&DisconnectReason::Requested),
            Transition::Stop
        );
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_no_retry_once_shutdown_flag_set() {
        let (mut controller, shutdown) = connected();
        shutdown.trigger();

        assert_eq!(
            controller.on_disconnected(&DisconnectReason::Network("reset".to_string())),
            Transition::Stop
        );
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_refused_connack_with_shutdown_stops() {
        let (mut controller, shutdown) = controller();
        controller.begin_connect();
        shutdown.trigger();

        assert_eq!(
            controller.on_connack(ConnAckCode::NotAuthorized),
            Transition::Stop
        );
    }

    #[test]
    fn test_shutting_down_is_terminal() {
        let (mut controller, _) = connected();

        assert!(controller.shut_down());
        assert!(!controller.shut_down());
        assert_eq!(
            controller.on_connack(ConnAckCode::Accepted),
            Transition::Ignored
        );
        assert_eq!(
            controller.on_disconnected(&DisconnectReason::ConnectTimeout),
            Transition::Ignored
        );
        assert!(!controller.begin_connect());
        assert_eq!(controller.state(), ConnectionState::ShuttingDown);
    }

    #[test]
    fn test_connack_while_connected_is_ignored() {
        let (mut controller, _) = connected();
        assert_eq!(
            controller.on_connack(ConnAckCode::Accepted),
            Transition::Ignored
        );
    }

    #[test]
    fn test_state_changes_are_published() {
        let (mut controller, _) = controller();
        let state_rx = controller.subscribe_state();

        controller.begin_connect();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);

        controller.on_connack(ConnAckCode::Accepted);
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
    }
}
