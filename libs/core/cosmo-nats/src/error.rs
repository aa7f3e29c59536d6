//! Error types for the NATS worker runtime.

use thiserror::Error;

/// Error that can occur in worker runtime operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// NATS connection error
    #[error("NATS connection error: {0}")]
    Connection(#[from] async_nats::ConnectError),

    /// The target stream does not exist on the broker.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The pool is shutting down and rejects new work.
    #[error("pool is shut down")]
    PoolClosed,

    /// JetStream management error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Publish error
    #[error("publish error: {0}")]
    Publish(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    /// Create a JetStream error from any SDK error.
    pub fn from_jetstream_error(error: impl std::fmt::Display) -> Self {
        Self::JetStream(error.to_string())
    }

    /// Create a publish error.
    pub fn publish_error(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a configuration error.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
