//! Email delivery job.

use async_trait::async_trait;
use cosmo_core::{JobContext, JobHandler, ProcessingError};
use serde_json::Value;
use tracing::info;

/// Sends a templated email to a user. Args: `[user_id, template]`.
pub struct EmailJob;

#[async_trait]
impl JobHandler for EmailJob {
    async fn perform(&self, ctx: &JobContext, args: &[Value]) -> Result<(), ProcessingError> {
        let user_id = args
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| ProcessingError::failed("missing or non-numeric user id"))?;
        let template = args
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| ProcessingError::failed("missing template name"))?;

        // Delivery is a stub; the provider integration plugs in here.
        info!(
            jid = %ctx.jid,
            user_id = user_id,
            template = %template,
            "Sending email"
        );
        Ok(())
    }
}
