//! Message sink behavior as seen in the log output
//!
//! Every received message produces exactly one record, whatever its
//! payload looks like.

use bytes::Bytes;
use chrono::Utc;
use mqtt_logger::agent::MessageSink;
use mqtt_logger::testing::LogCapture;
use mqtt_logger::transport::InboundMessage;
use rumqttc::QoS;
use tracing::Level;

fn message(topic: &str, qos: QoS, payload: impl Into<Bytes>) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        qos,
        payload: payload.into(),
        received_at: Utc::now(),
    }
}

#[test]
fn test_one_record_per_message() {
    let capture = LogCapture::new();
    let sink = MessageSink::new();

    tracing::subscriber::with_default(capture.subscriber(Level::INFO), || {
        sink.on_message(&message("iot/a/status", QoS::AtMostOnce, "online"));
        sink.on_message(&message("iot/b/status", QoS::AtLeastOnce, "offline"));
        sink.on_message(&message("iot/c/status", QoS::ExactlyOnce, ""));
    });

    let lines = capture.lines();
    assert_eq!(lines.len(), 3, "{lines:#?}");
    assert!(lines[0].ends_with(" - INFO - Topic: iot/a/status | QoS: 0 | Message: online"));
    assert!(lines[1].ends_with("Topic: iot/b/status | QoS: 1 | Message: offline"));
    assert!(lines[2].ends_with("Topic: iot/c/status | QoS: 2 | Message: "));
}

#[test]
fn test_invalid_utf8_logs_error_record() {
    let capture = LogCapture::new();
    let sink = MessageSink::new();

    tracing::subscriber::with_default(capture.subscriber(Level::INFO), || {
        sink.on_message(&message(
            "iot/x/status",
            QoS::AtMostOnce,
            Bytes::from_static(&[0x80, 0x81]),
        ));
    });

    let lines = capture.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(" - ERROR - Error processing message: "));
    assert!(lines[0].contains("topic: iot/x/status"));
    assert!(lines[0].contains("2 bytes"));
    assert_eq!(sink.stats().decode_failures, 1);
}

#[test]
fn test_multibyte_payload_kept_intact() {
    let capture = LogCapture::new();
    let sink = MessageSink::new();

    tracing::subscriber::with_default(capture.subscriber(Level::INFO), || {
        sink.on_message(&message("iot/ü/status", QoS::AtMostOnce, "température 21°C ✓"));
    });

    assert!(capture
        .contents()
        .contains("Topic: iot/ü/status | QoS: 0 | Message: température 21°C ✓"));
}

#[test]
fn test_records_suppressed_below_threshold() {
    let capture = LogCapture::new();
    let sink = MessageSink::new();

    tracing::subscriber::with_default(capture.subscriber(Level::WARN), || {
        sink.on_message(&message("iot/a/status", QoS::AtMostOnce, "online"));
    });

    assert!(capture.lines().is_empty());
    assert_eq!(sink.stats().received, 1);
}

#[test]
fn test_multiline_payload_stays_one_record() {
    let capture = LogCapture::new();
    let sink = MessageSink::new();

    tracing::subscriber::with_default(capture.subscriber(Level::INFO), || {
        sink.on_message(&message("iot/a/status", QoS::AtMostOnce, "first\nsecond\r\n"));
        sink.on_message(&message("iot/b/status", QoS::AtMostOnce, "after"));
    });

    let lines = capture.lines();
    assert_eq!(lines.len(), 2, "{lines:#?}");
    assert!(lines[0].ends_with("Message: first\\nsecond\\r\\n"));
    assert!(lines[1].ends_with("Message: after"));
}
