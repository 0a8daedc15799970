//! Admission control for forward tasks.

use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Spawns forward tasks, shedding them when too many are in flight.
///
/// A bounded pool never queues: a task offered while every permit is held is
/// rejected on the spot and never runs.
#[derive(Debug, Clone)]
pub enum WorkerPool {
    Bounded(Arc<Semaphore>),
    Unbounded,
}

impl WorkerPool {
    /// A pool running at most `max_concurrency` tasks, or any number of them
    /// when zero.
    pub fn new(max_concurrency: usize) -> Self {
        match max_concurrency {
            0 => Self::Unbounded,
            n => Self::Bounded(Arc::new(Semaphore::new(n))),
        }
    }

    /// Spawn `task` on `tracker` if a slot is free, returning whether it was
    /// spawned.
    pub fn go_if_available<F>(&self, tracker: &TaskTracker, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Self::Unbounded => {
                tracker.spawn(task);
                true
            }
            Self::Bounded(sem) => {
                let Ok(permit) = Arc::clone(sem).try_acquire_owned() else {
                    return false;
                };
                tracker.spawn(async move {
                    task.await;
                    drop(permit);
                });
                true
            }
        }
    }

    /// Free slots, `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        match self {
            Self::Bounded(sem) => Some(sem.available_permits()),
            Self::Unbounded => None,
        }
    }
}
