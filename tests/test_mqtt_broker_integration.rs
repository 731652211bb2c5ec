//! Integration tests against an in-process MQTT broker
//!
//! Covers the full lifecycle: connect, subscribe, log messages, survive a
//! dropped connection, and shut down with a single DISCONNECT.


use mqtt_logger::testing::LogCapture;
use mqtt_logger::transport::mqtt::ConnectionState;
use mqtt_logger::{LoggerService, ShutdownCoordinator, ShutdownFlag, TerminationSignal};
use mqtt_integration_helpers::{
    logger_config, BrokerBehavior, BrokerEvent, FakeBroker, RetainedMessage, TEST_TOPIC_FILTER,
};
use rumqttc::{ConnectReturnCode, QoS};
use std::time::Duration;
use tracing::Level;

const WAIT: Duration = Duration::from_secs(5);

/// `from -> to` pairs taken from the controller's debug output, in order
fn state_changes(capture: &LogCapture) -> Vec<String> {
    capture
        .lines()
        .iter()
        .filter_map(|line| line.split_once("Connection state: "))
        .map(|(_, change)| change.to_string())
        .collect()
}

async fn wait_for_received<T: mqtt_logger::transport::Transport>(
    service: &LoggerService<T>,
    expected: u64,
) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if service.stats().received >= expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_connect_subscribe_and_log_message() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber(Level::INFO));

    let broker = FakeBroker::start().await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown.clone());

    service.start().await.expect("initial connect should succeed");
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);
    assert!(matches!(
        &broker.events()[1],
        BrokerEvent::Subscribed { topic, qos: QoS::AtMostOnce } if topic == TEST_TOPIC_FILTER
    ));

    broker.publish("iot/dev1/status", b"online");
    assert!(wait_for_received(&service, 1).await);
    assert_eq!(*service.state().borrow(), ConnectionState::Connected);

    shutdown.trigger();
    service.shutdown().await.unwrap();

    let lines = capture.lines();
    let message_lines: Vec<_> = lines
        .iter()
        .filter(|l| l.contains("Topic: iot/dev1/status | QoS: 0 | Message: online"))
        .collect();
    assert_eq!(message_lines.len(), 1, "log lines: {lines:#?}");
    assert!(message_lines[0].contains(" - INFO - "));

    let connected = lines
        .iter()
        .position(|l| l.contains("Connected to MQTT broker successfully"));
    let subscribed = lines
        .iter()
        .position(|l| l.contains(&format!("Subscribed to topic: {TEST_TOPIC_FILTER}")));
    assert!(connected.is_some() && subscribed.is_some());
    assert!(connected < subscribed);
}

#[tokio::test]
async fn test_credentials_are_sent() {
    let broker = FakeBroker::start().await;
    let mut config = logger_config(broker.port());
    config.mqtt.username = "sensor".to_string();
    config.mqtt.password = "s3cret".to_string();

    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&config, shutdown.clone());
    service.start().await.unwrap();

    assert_eq!(
        broker.events()[0],
        BrokerEvent::Connected {
            client_id: "mqtt-logger-it".to_string(),
            username: Some("sensor".to_string()),
        }
    );

    shutdown.trigger();
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_and_resubscribes_after_drop() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber(Level::DEBUG));

    let broker = FakeBroker::start().await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown.clone());

    service.start().await.unwrap();
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);

    broker.drop_connection();

    assert!(
        broker.wait_until(|b| b.subscribe_count() == 2, WAIT).await,
        "expected resubscribe, broker saw {:?}",
        broker.events()
    );
    assert_eq!(broker.connect_count(), 2);

    // Messages flow again on the new connection
    broker.publish("iot/dev2/status", b"back");
    assert!(wait_for_received(&service, 1).await);

    shutdown.trigger();
    service.shutdown().await.unwrap();

    assert_eq!(
        state_changes(&capture),
        vec![
            "Disconnected -> Connecting",
            "Connecting -> Connected",
            "Connected -> Disconnected",
            "Disconnected -> Connecting",
            "Connecting -> Connected",
            "Connected -> ShuttingDown",
        ]
    );
}

#[tokio::test]
async fn test_large_payload_logged_on_same_connection() {
    let broker = FakeBroker::start().await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown.clone());

    service.start().await.unwrap();
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);

    broker.publish("iot/big/status", &vec![b'x'; 300 * 1024]);
    assert!(wait_for_received(&service, 1).await);

    assert_eq!(service.stats().decode_failures, 0);
    assert_eq!(*service.state().borrow(), ConnectionState::Connected);
    assert_eq!(broker.connect_count(), 1);

    shutdown.trigger();
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversized_retained_message_does_not_hot_loop() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber(Level::INFO));

    let broker = FakeBroker::start_with(BrokerBehavior {
        retained: Some(RetainedMessage {
            topic: "iot/big/status",
            payload_len: 4096,
        }),
        ..Default::default()
    })
    .await;
    let mut config = logger_config(broker.port());
    config.mqtt.max_packet_bytes = 1024;
    config.reconnect.jitter = 0.0;

    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&config, shutdown.clone());
    service.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let connects = broker.connect_count();

    shutdown.trigger();
    service.shutdown().await.unwrap();

    // 0, 0, 50, 100, then 200 ms between attempts
    assert!(connects >= 2, "expected retries, saw {connects} connects");
    assert!(connects <= 15, "reconnect loop without backoff: {connects} connects");
    assert_eq!(service.stats().received, 0);

    let lines = capture.lines();
    assert!(
        lines
            .iter()
            .any(|l| l.contains(" - ERROR - Dropped inbound packet of")),
        "{lines:#?}"
    );
}

#[tokio::test]
async fn test_shutdown_sends_single_disconnect_and_stops_reconnecting() {
    let broker = FakeBroker::start().await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown.clone());
    let state = service.state();

    service.start().await.unwrap();
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);

    shutdown.trigger();
    service.shutdown().await.unwrap();
    service.shutdown().await.unwrap();

    assert!(broker.wait_until(|b| b.disconnect_count() == 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(broker.disconnect_count(), 1);
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(*state.borrow(), ConnectionState::ShuttingDown);
}

#[tokio::test]
async fn test_run_stops_on_signal() {
    let broker = FakeBroker::start().await;
    let shutdown = ShutdownFlag::new();
    let coordinator = ShutdownCoordinator::new(shutdown.clone());
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown);

    let handle = tokio::spawn(async move { service.run().await });
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);

    assert!(coordinator.handle_signal(TerminationSignal::Terminate));
    assert!(!coordinator.handle_signal(TerminationSignal::Interrupt));

    tokio::time::timeout(WAIT, handle)
        .await
        .expect("run should return after the signal")
        .unwrap()
        .unwrap();
    assert!(broker.wait_until(|b| b.disconnect_count() == 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_invalid_utf8_payload_keeps_connection() {
    let broker = FakeBroker::start().await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown.clone());

    service.start().await.unwrap();
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);

    broker.publish("iot/dev3/status", &[0xff, 0xfe, 0xfd]);
    broker.publish("iot/dev3/status", b"still here");
    assert!(wait_for_received(&service, 2).await);

    assert_eq!(service.stats().decode_failures, 1);
    assert_eq!(*service.state().borrow(), ConnectionState::Connected);
    assert_eq!(broker.connect_count(), 1);

    shutdown.trigger();
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_subscription_keeps_running() {
    let broker = FakeBroker::start_with(BrokerBehavior {
        reject_subscriptions: true,
        ..Default::default()
    })
    .await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown.clone());

    service.start().await.unwrap();
    assert!(broker.wait_until(|b| b.subscribe_count() == 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*service.state().borrow(), ConnectionState::Connected);
    assert_eq!(broker.connect_count(), 1);

    shutdown.trigger();
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_connack_fails_startup() {
    let broker = FakeBroker::start_with(BrokerBehavior {
        connack_code: ConnectReturnCode::NotAuthorized,
        ..Default::default()
    })
    .await;
    let shutdown = ShutdownFlag::new();
    let mut service = LoggerService::from_config(&logger_config(broker.port()), shutdown);

    let error = service.start().await.expect_err("refused connect is fatal");
    assert!(error.to_string().contains("refused"), "{error}");
    assert_eq!(*service.state().borrow(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.connect_count(), 1);
}
