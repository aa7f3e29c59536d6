//! Error types for job construction and handler execution.

use thiserror::Error;

/// Error building a job envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The enqueue options did not name a target stream.
    #[error("job options must name a stream")]
    MissingStream,
}

/// Error returned by a job or stream handler.
///
/// The category decides what the worker does with the message:
/// - `Failed` goes through the retry policy (nak with backoff, then
///   dead-letter or terminate, depending on the envelope).
/// - `Fatal` is logged and propagated without acking; the broker will
///   redeliver and the process supervisor is expected to intervene.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Recoverable failure; the job will be retried.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Out-of-band fault the retry policy must not absorb.
    #[error("fatal: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Payload could not be decoded. Treated as recoverable.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessingError {
    /// Create a recoverable failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a recoverable failure with a source error.
    pub fn failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fatal error with a source error.
    pub fn fatal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error must bypass the retry policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessingError::Fatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_is_not_fatal() {
        let err = ProcessingError::failed("smtp timeout");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "smtp timeout");
    }

    #[test]
    fn test_fatal() {
        let err = ProcessingError::fatal("database gone");
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "fatal: database gone");
    }

    #[test]
    fn test_serialization_is_recoverable() {
        let err = ProcessingError::from(serde_json::from_str::<String>("{").unwrap_err());
        assert!(!err.is_fatal());
    }
}
