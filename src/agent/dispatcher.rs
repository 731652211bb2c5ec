//! Event dispatch from the receive loop to the service components
//!
//! Connection events go to the reconnection controller first; entering
//! Connected triggers the subscription. Messages go to the sink and never
//! touch connection state.

use super::sink::MessageSink;
use super::subscription::SubscriptionManager;
use crate::transport::mqtt::{DisconnectReason, MqttError, ReconnectionController, Transition};
use crate::transport::{Directive, SessionEvent, SessionObserver};
use tracing::{debug, error};

pub struct EventDispatcher {
    controller: ReconnectionController,
    subscriptions: SubscriptionManager,
    sink: MessageSink,
}

impl EventDispatcher {
    pub fn new(
        controller: ReconnectionController,
        subscriptions: SubscriptionManager,
        sink: MessageSink,
    ) -> Self {
        Self {
            controller,
            subscriptions,
            sink,
        }
    }

    pub fn controller(&self) -> &ReconnectionController {
        &self.controller
    }

    /// Map a state machine transition to a receive loop directive (pure function)
    pub fn directive_for(transition: Transition) -> Directive {
        match transition {
            Transition::EnteredConnected | Transition::Ignored => Directive::Continue,
            Transition::Reconnect { attempt, delay } => Directive::Reconnect { attempt, delay },
            Transition::Stop => Directive::Stop,
        }
    }

    fn apply(&mut self, transition: Transition) -> Directive {
        if transition == Transition::EnteredConnected {
            self.subscriptions.on_connected();
        }
        Self::directive_for(transition)
    }
}

impl SessionObserver for EventDispatcher {
    fn on_connecting(&mut self) {
        if !self.controller.begin_connect() {
            debug!("Connect requested while {}", self.controller.state());
        }
    }

    fn on_connect_failed(&mut self, error: &MqttError) {
        error!("Initial connection failed: {}", error);
        self.controller.connect_failed();
    }

    fn on_event(&mut self, event: SessionEvent) -> Directive {
        match event {
            SessionEvent::Connected(code) => {
                let transition = self.controller.on_connack(code);
                self.apply(transition)
            }
            SessionEvent::Disconnected(reason) => {
                if let DisconnectReason::PacketTooLarge(size) = &reason {
                    error!(
                        "Dropped inbound packet of {} bytes: larger than mqtt.max_packet_bytes",
                        size
                    );
                }
                let transition = self.controller.on_disconnected(&reason);
                self.apply(transition)
            }
            SessionEvent::MessageReceived(message) => {
                self.controller.on_message();
                self.sink.on_message(&message);
                Directive::Continue
            }
            SessionEvent::SubscribeAck { packet_id, granted } => {
                debug!("SubAck for packet {}: {:?}", packet_id, granted);
                self.subscriptions.on_subscribe_ack(&granted);
                Directive::Continue
            }
        }
    }

    fn on_shutdown(&mut self) {
        self.controller.shut_down();
    }
}
