//! Bounded execution pool: the sole backpressure mechanism.

use crate::error::WorkerError;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Duration;
use tracing::debug;

/// Fixed-size pool over a counted semaphore.
///
/// `post` blocks the caller until a permit is free, so fetch loops never
/// read ahead of handler capacity: at most `size` handler invocations are
/// in flight, and the broker is not pulled while handlers are slow.
pub struct BoundedPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

struct Slot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        // Runs on normal completion and on panic; the permit drops with us.
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl BoundedPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Submit a task, waiting for a free permit.
    ///
    /// Returns `WorkerError::PoolClosed` once `shutdown` has been called so
    /// producer loops can exit.
    pub async fn post<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::PoolClosed)?;

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let slot = Slot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
            idle: self.idle.clone(),
        };

        tokio::spawn(async move {
            let _slot = slot;
            task.await;
        });

        Ok(())
    }

    /// Forbid new submissions. In-flight tasks keep running.
    pub fn shutdown(&self) {
        debug!("Pool shutting down");
        self.semaphore.close();
    }

    /// Wait until all in-flight tasks finish, up to `timeout`.
    ///
    /// Returns `false` when the deadline expired with tasks still running;
    /// those are abandoned, not cancelled.
    pub async fn wait_for_termination(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}
