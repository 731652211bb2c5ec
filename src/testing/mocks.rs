//! Mock implementations for testing
//!
//! Provides a mock Transport, a recording SubscribeCommand and a log
//! capture buffer to test the service without a broker.

use crate::observability::LineFormat;
use crate::transport::mqtt::{MqttError, SubscriptionSpec};
use crate::transport::{SubscribeCommand, Transport};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("mock transport failure: {0}")]
pub struct MockTransportError(pub String);

/// Mock transport counting lifecycle calls; clones share counters
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    connects: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    pub fail_connect: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(MockTransportError("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// SubscribeCommand that records every request
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    calls: Mutex<Vec<SubscriptionSpec>>,
    should_fail: bool,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<SubscriptionSpec> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

impl SubscribeCommand for RecordingSubscriber {
    fn subscribe(&self, spec: &SubscriptionSpec) -> Result<(), MqttError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        if self.should_fail {
            return Err(MqttError::NoObserver);
        }
        Ok(())
    }
}

/// In-memory log sink using the service line format
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber writing formatted lines into this capture
    pub fn subscriber(&self, level: tracing::Level) -> impl tracing::Subscriber + Send + Sync {
        let capture = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(LineFormat)
            .with_max_level(level)
            .with_writer(move || capture.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|buffer| String::from_utf8_lossy(&buffer).into_owned())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("log capture poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
