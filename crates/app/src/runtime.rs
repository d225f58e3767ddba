//! Node-local machinery shared by the automation engine and the sync runner.

use std::sync::Arc;

use crate::ports::Clock;
use crate::scheduler::LocalScheduler;
use crate::task_queue::{SubmitOptions, TransactionalTaskQueue};

/// Timers, worker pool and clock of one node.
#[derive(Clone)]
pub struct NodeRuntime {
    pub scheduler: LocalScheduler,
    pub queue: Arc<TransactionalTaskQueue>,
    pub clock: Arc<dyn Clock>,
}

impl NodeRuntime {
    /// A runtime with a fresh scheduler and a queue of `workers` workers.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, workers: usize, options: SubmitOptions) -> Self {
        Self {
            scheduler: LocalScheduler::new(Arc::clone(&clock)),
            queue: Arc::new(TransactionalTaskQueue::new(workers, options)),
            clock,
        }
    }

    /// Cancel every timer of this node and skip queued jobs.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.queue.shutdown();
    }
}
