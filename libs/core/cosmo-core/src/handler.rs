//! Handler trait for background jobs.

use crate::error::ProcessingError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Per-invocation context handed to a job handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The job id of the envelope being executed.
    pub jid: String,
}

/// A background-job handler.
///
/// A fresh instance is built (via the registered factory) for every message,
/// so implementations never share state across invocations.
///
/// # Error Handling
///
/// - `Ok(())` acknowledges the message.
/// - `ProcessingError::Failed` enters the retry policy: nak with backoff
///   until the envelope's retry budget is spent, then dead-letter or
///   terminate.
/// - `ProcessingError::Fatal` is logged and left un-acked.
///
/// # Example
///
/// ```rust,ignore
/// struct EmailJob;
///
/// #[async_trait]
/// impl JobHandler for EmailJob {
///     async fn perform(&self, ctx: &JobContext, args: &[Value]) -> Result<(), ProcessingError> {
///         let user_id = args
///             .first()
///             .and_then(Value::as_i64)
///             .ok_or_else(|| ProcessingError::failed("missing user id"))?;
///         send_welcome_email(user_id).await
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job with the envelope's positional arguments.
    async fn perform(&self, ctx: &JobContext, args: &[Value]) -> Result<(), ProcessingError>;
}

/// Factory producing a fresh handler per message.
pub type JobHandlerFactory = Arc<dyn Fn() -> Box<dyn JobHandler> + Send + Sync>;
