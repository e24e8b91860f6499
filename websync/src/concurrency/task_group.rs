use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;

/// Group of spawned tasks of which at most `max_concurrent` run at the same time.
///
/// [`BoundedTaskGroup::spawn`] waits for a free slot before spawning, so callers produce work no
/// faster than it is consumed. The slot is held by the task itself and is given back when the task
/// finishes, including when it panics.
#[derive(Debug)]
pub struct BoundedTaskGroup<T> {
    semaphore: Arc<Semaphore>,
    join_set: JoinSet<T>,
    max_concurrent: usize,
}

impl<T> BoundedTaskGroup<T>
where
    T: Send + 'static,
{
    /// Creates a group running at most `max_concurrent` tasks, with a minimum of one.
    pub fn new(max_concurrent: usize) -> BoundedTaskGroup<T> {
        let max_concurrent = max_concurrent.max(1);

        BoundedTaskGroup {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            join_set: JoinSet::new(),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks spawned and not yet joined.
    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Waits for a free slot, then spawns `future` on the runtime.
    pub async fn spawn<F>(&mut self, future: F) -> SyncResult<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::InvalidState,
                    "Could not acquire a task slot",
                    err.to_string()
                )
            })?;

        // The permit is moved into the task and dropped with it, also during unwinding.
        self.join_set.spawn(async move {
            let _permit = permit;
            future.await
        });

        Ok(())
    }

    /// Waits for every spawned task and returns their outputs in completion order.
    ///
    /// A task that panicked is reported as [`ErrorKind::SyncWorkerPanic`] without affecting the
    /// others.
    pub async fn join_all(mut self) -> Vec<SyncResult<T>> {
        let mut results = Vec::with_capacity(self.join_set.len());

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok(output) => results.push(Ok(output)),
                Err(join_err) if join_err.is_cancelled() => {
                    debug!("task was cancelled");
                    results.push(Err(sync_error!(
                        ErrorKind::SyncWorkerPanic,
                        "Task was cancelled",
                        join_err
                    )));
                }
                Err(join_err) => {
                    error!(error = %join_err, "task panicked");
                    results.push(Err(sync_error!(
                        ErrorKind::SyncWorkerPanic,
                        "Task panicked",
                        join_err
                    )));
                }
            }
        }

        results
    }
}
