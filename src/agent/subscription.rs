//! Subscription management
//!
//! The single configured subscription is issued every time the connection
//! enters Connected, since a clean session forgets it across reconnects.

use crate::transport::mqtt::{qos_level, SubscriptionSpec};
use crate::transport::SubscribeCommand;
use rumqttc::QoS;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SubscriptionManager {
    spec: SubscriptionSpec,
    commands: Arc<dyn SubscribeCommand>,
}

impl SubscriptionManager {
    pub fn new(spec: SubscriptionSpec, commands: Arc<dyn SubscribeCommand>) -> Self {
        Self { spec, commands }
    }

    /// Issue the subscription; called once per entry into Connected
    pub fn on_connected(&self) -> bool {
        match self.commands.subscribe(&self.spec) {
            Ok(()) => {
                info!("Subscribed to topic: {}", self.spec.topic_filter);
                true
            }
            Err(e) => {
                error!(
                    "Failed to subscribe to {}: {}",
                    self.spec.topic_filter, e
                );
                false
            }
        }
    }

    /// Check granted QoS levels against the request
    pub fn on_subscribe_ack(&self, granted: &[Option<QoS>]) {
        let requested = qos_level(self.spec.qos);

        for grant in granted {
            match grant {
                Some(qos) if qos_level(*qos) < requested => warn!(
                    "Broker downgraded subscription to {} from QoS {} to QoS {}",
                    self.spec.topic_filter,
                    requested,
                    qos_level(*qos)
                ),
                Some(qos) => info!(
                    "Subscription to {} confirmed with QoS {}",
                    self.spec.topic_filter,
                    qos_level(*qos)
                ),
                None => error!(
                    "Broker rejected subscription to {}",
                    self.spec.topic_filter
                ),
            }
        }
    }
}
