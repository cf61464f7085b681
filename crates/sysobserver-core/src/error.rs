//! Error types for sysobserver

use thiserror::Error;

/// Result type alias using sysobserver's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for sysobserver operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unreadable configuration (fatal at load, prevents start)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// A metric source failed or timed out for this cycle
    #[error("Sample unavailable for {metric}: {reason}")]
    SampleUnavailable { metric: String, reason: String },

    /// Notification could not be delivered
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// The observer task is gone
    #[error("Observer error: {0}")]
    Observer(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sample-unavailable error
    pub fn sample_unavailable(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SampleUnavailable {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create an observer error
    pub fn observer(msg: impl Into<String>) -> Self {
        Self::Observer(msg.into())
    }

    /// Whether this error must stop the observer from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ConfigSource(_))
    }
}
