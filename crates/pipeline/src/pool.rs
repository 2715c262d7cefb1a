//! Bounded worker pool for external calls.
//!
//! A permit is held only while a single external call is in flight. Stage
//! drivers, sequence loops and backoff sleeps never hold one, so capacity
//! bounds executing work rather than in-flight jobs.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The pool was closed while waiting for a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Worker pool is closed")]
pub struct PoolClosed;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Pool allowing `capacity` concurrent calls (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PoolClosed> {
        self.permits.clone().acquire_owned().await.map_err(|_| PoolClosed)
    }

    /// Reject all current and future waiters.
    pub fn close(&self) {
        self.permits.close();
    }
}
