use std::{future::Future, sync::Arc};

use tokio::{
    sync::{AcquireError, Semaphore},
    task::{JoinError, JoinSet},
};

/// A `JoinSet` that runs at most `max_tasks` tasks at a time. `spawn` waits
/// for a free slot before the task starts.
pub struct BoundedJoinSet<T> {
    semaphore: Arc<Semaphore>,
    join_set: JoinSet<T>,
}

impl<T: Send + 'static> BoundedJoinSet<T> {
    pub fn new(max_tasks: usize) -> Self {
        let semaphore = Arc::new(Semaphore::new(max_tasks.max(1)));
        let join_set = JoinSet::new();
        BoundedJoinSet {
            semaphore,
            join_set,
        }
    }

    pub async fn spawn<F>(&mut self, task: F) -> Result<(), AcquireError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await?;
        self.join_set.spawn(async move {
            let value = task.await;
            drop(permit);
            value
        });
        Ok(())
    }

    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.join_set.join_next().await
    }
}
