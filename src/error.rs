//! Top-level error types for the logger service
//!
//! Module-level errors (`ConfigError`, `MqttError`, `SinkError`) stay close
//! to their modules; `ServiceError` is what the binary sees.

use thiserror::Error;

/// Main error type for service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Logging setup failed: {0}")]
    Logging(#[source] std::io::Error),

    #[error("Signal handler installation failed: {0}")]
    Signal(#[source] std::io::Error),
}

impl ServiceError {
    /// Wrap any transport error
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}

impl From<crate::transport::mqtt::MqttError> for ServiceError {
    fn from(error: crate::transport::mqtt::MqttError) -> Self {
        Self::transport(error)
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
