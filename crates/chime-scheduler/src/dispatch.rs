use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    executor::Executor,
    types::Task,
};

/// Hands tasks to the executor through a bounded queue.
///
/// At most `workers` executions run at once; once `queue_capacity` tasks are
/// waiting, further dispatches are rejected. A rejected task stays `pending`
/// in the store and is picked up by the next catchup pass.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Task>,
}

impl Dispatcher {
    /// Start the worker loop on the current runtime.
    pub fn spawn(executor: Executor, workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(worker_loop(executor, rx, workers.max(1)));
        Self { tx }
    }

    /// Queue `task` without waiting.
    pub fn dispatch(&self, task: Task) -> Result<()> {
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task = %task.key(), "dispatch queue full, task left pending");
                Err(SchedulerError::QueueFull {
                    key: task.key().format(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::DispatcherClosed),
        }
    }
}

async fn worker_loop(executor: Executor, mut rx: mpsc::Receiver<Task>, workers: usize) {
    let permits = Arc::new(Semaphore::new(workers));
    info!(workers, "dispatcher started");

    while let Some(task) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let executor = executor.clone();
        tokio::spawn(async move {
            let key = task.key();
            let outcome = executor.execute(task).await;
            debug!(task = %key, ?outcome, "dispatch finished");
            drop(permit);
        });
    }

    info!("dispatcher stopped");
}
