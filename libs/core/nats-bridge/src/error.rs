//! Error types for the NATS bridge.

use thiserror::Error;

/// Error that can occur in pool, session, or publish operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid session or connection parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Broker unreachable, auth rejected, or invalid endpoint
    #[error("NATS connection error: {0}")]
    Connection(String),

    /// Fetching or creating the ephemeral consumer failed
    #[error("Consumer provisioning error: {0}")]
    ConsumerProvision(String),

    /// Decoding or dispatching a single message failed
    #[error("Message processing error: {0}")]
    MessageProcessing(String),

    /// Teardown failure (consumer deletion, connection drain)
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Request/reply error
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether this error aborts session startup.
    ///
    /// Per-message and cleanup errors never terminate a running session.
    pub fn is_fatal_at_start(&self) -> bool {
        matches!(
            self,
            BridgeError::Configuration(_)
                | BridgeError::Connection(_)
                | BridgeError::ConsumerProvision(_)
        )
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a connection error from any displayable cause.
    pub fn connection(error: impl std::fmt::Display) -> Self {
        Self::Connection(error.to_string())
    }

    /// Create a provisioning error from any displayable cause.
    pub fn provision(error: impl std::fmt::Display) -> Self {
        Self::ConsumerProvision(error.to_string())
    }

    /// Create a message processing error.
    pub fn processing(error: impl std::fmt::Display) -> Self {
        Self::MessageProcessing(error.to_string())
    }

    /// Create a cleanup error.
    pub fn cleanup(error: impl std::fmt::Display) -> Self {
        Self::Cleanup(error.to_string())
    }

    /// Create a publish error.
    pub fn publish_error(error: impl std::fmt::Display) -> Self {
        Self::Publish(error.to_string())
    }

    /// Create a request error.
    pub fn request_error(error: impl std::fmt::Display) -> Self {
        Self::Request(error.to_string())
    }
}
