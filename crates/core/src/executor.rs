//! Bounded concurrency gate with a drain barrier.
//!
//! At most `parallelism` submitted operations run at once. Each launched
//! operation owns its slot permit, so the slot is returned on every exit path:
//! normal completion, error, panic or abort of the spawned task.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("parallelism must be in range 1..={max}, got {requested}")]
    InvalidParallelism { requested: usize, max: usize },
    #[error("executor has been drained and no longer accepts work")]
    Closed,
}

const MAX_PARALLELISM: usize = u32::MAX as usize;

#[derive(Debug)]
pub struct BoundedExecutor {
    parallelism: usize,
    slots: Arc<Semaphore>,
}

impl BoundedExecutor {
    pub fn new(parallelism: usize) -> Result<Self, ExecutorError> {
        let max = MAX_PARALLELISM.min(Semaphore::MAX_PERMITS);
        if parallelism == 0 || parallelism > max {
            return Err(ExecutorError::InvalidParallelism { requested: parallelism, max });
        }
        Ok(Self { parallelism, slots: Arc::new(Semaphore::new(parallelism)) })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Number of slots currently held by launched operations.
    pub fn in_flight(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.parallelism.saturating_sub(self.slots.available_permits())
    }

    /// Waits for a free slot, then launches `operation` on the runtime.
    pub async fn submit<F>(&self, operation: F) -> Result<JoinHandle<F::Output>, ExecutorError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit =
            Arc::clone(&self.slots).acquire_owned().await.map_err(|_| ExecutorError::Closed)?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            operation.await
        }))
    }

    /// Waits until every launched operation has released its slot, then
    /// closes the executor. Submissions after this point fail with `Closed`.
    pub async fn drain(&self) -> Result<(), ExecutorError> {
        // `new` bounds parallelism to u32, so the conversion cannot truncate.
        let all_slots = u32::try_from(self.parallelism).unwrap_or(u32::MAX);
        let permits = self.slots.acquire_many(all_slots).await.map_err(|_| ExecutorError::Closed)?;
        self.slots.close();
        drop(permits);
        Ok(())
    }
}
