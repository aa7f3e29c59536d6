//! Click-event stream handler.

use async_trait::async_trait;
use cosmo_core::ProcessingError;
use cosmo_nats::{StreamHandler, StreamMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Counts click events. One instance handles every batch for its stream, so
/// the counter is atomic.
pub struct ClickCounter {
    total: AtomicU64,
}

impl ClickCounter {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for ClickCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamHandler for ClickCounter {
    async fn process_one(&self, message: StreamMessage) -> Result<(), ProcessingError> {
        let data = message.data()?;
        let count = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(subject = %message.subject(), total = count, payload = %data, "Counted click");
        message
            .ack()
            .await
            .map_err(|e| ProcessingError::failed(e.to_string()))?;
        Ok(())
    }
}
