//! Transaction-bound task queue and bounded worker pool.
//!
//! Work triggered from inside a host transaction must only run if that
//! transaction commits. [`TransactionalTaskQueue::enlist`] defers a job until
//! [`TransactionalTaskQueue::commit`] and drops it on rollback; without a
//! transaction the job is submitted right away.
//!
//! Submitted jobs run on a worker pool bounded by a semaphore. Each carries a
//! deadline: past it the job is flagged cancelled and a warning is logged.
//! Cancellation is cooperative. A job that already started runs to
//! completion and its side effects stay.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// A unit of deferred work.
pub type Job = BoxFuture<'static, ()>;

/// How a job is handed to the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Wait for completion, or the deadline, before returning.
    pub blocking: bool,
    /// Deadline measured from submission.
    pub timeout: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            blocking: false,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed,
    /// Cancelled before a worker picked it up.
    Skipped,
    /// The job panicked.
    Failed,
    /// The deadline passed first. The job may still finish later.
    TimedOut,
}

impl TaskStatus {
    #[must_use]
    pub fn is_final(self) -> bool {
        self != Self::Pending
    }
}

/// Observes a submitted job.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    status: watch::Receiver<TaskStatus>,
    cancellation: CancellationToken,
}

impl TaskHandle {
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Request cancellation. Only prevents a job that has not started yet.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Wait until the job completed, failed, was skipped or timed out.
    pub async fn wait(&mut self) -> TaskStatus {
        let waited = match self.status.wait_for(|status| status.is_final()).await {
            Ok(status) => Some(*status),
            Err(_) => None,
        };
        waited.unwrap_or_else(|| self.status())
    }
}

enum TransactionState {
    Active(Vec<Job>),
    Completed,
}

/// A host transaction that jobs can be attached to.
pub struct Transaction {
    state: Mutex<TransactionState>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::begin()
    }
}

impl Transaction {
    #[must_use]
    pub fn begin() -> Self {
        Self {
            state: Mutex::new(TransactionState::Active(Vec::new())),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            TransactionState::Active(_)
        )
    }

    /// Number of jobs waiting for commit.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            TransactionState::Active(jobs) => jobs.len(),
            TransactionState::Completed => 0,
        }
    }

    /// Attach `job` to the after-completion phase. Hands the job back when
    /// the transaction is no longer active.
    fn enlist_after_completion(&self, job: Job) -> Result<(), Job> {
        match &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            TransactionState::Active(jobs) => {
                jobs.push(job);
                Ok(())
            }
            TransactionState::Completed => Err(job),
        }
    }

    fn complete(&self) -> Vec<Job> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, TransactionState::Completed) {
            TransactionState::Active(jobs) => jobs,
            TransactionState::Completed => Vec::new(),
        }
    }

    /// Discard every enlisted job.
    pub fn rollback(self) {
        let discarded = self.complete().len();
        tracing::debug!(discarded, "transaction rolled back");
    }
}

/// Runs jobs after their transaction commits, on a bounded worker pool.
pub struct TransactionalTaskQueue {
    permits: Arc<Semaphore>,
    options: SubmitOptions,
    /// Parent of every job token.
    shutdown: CancellationToken,
}

impl TransactionalTaskQueue {
    /// Create a queue running at most `workers` jobs at once, submitting
    /// with `options` when jobs are released by a commit or enlisted outside
    /// a transaction.
    #[must_use]
    pub fn new(workers: usize, options: SubmitOptions) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Skip every job that has not started yet, including later ones.
    /// Running jobs complete.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn options(&self) -> SubmitOptions {
        self.options
    }

    /// Run `job` after `tx` commits, or right away without an active
    /// transaction. Returns a handle only when the job was submitted.
    pub async fn enlist(&self, tx: Option<&Transaction>, job: Job) -> Option<TaskHandle> {
        let job = match tx {
            Some(tx) => match tx.enlist_after_completion(job) {
                Ok(()) => return None,
                Err(job) => job,
            },
            None => job,
        };
        Some(self.submit(job, self.options).await)
    }

    /// Commit `tx`, submitting its jobs in enlistment order.
    pub async fn commit(&self, tx: Transaction) -> Vec<TaskHandle> {
        let jobs = tx.complete();
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            handles.push(self.submit(job, self.options).await);
        }
        handles
    }

    /// Hand `job` to the worker pool with a deadline.
    ///
    /// With `blocking` set this waits until the job finished or the deadline
    /// passed; otherwise it returns immediately and a watchdog enforces the
    /// deadline.
    pub async fn submit(&self, job: Job, options: SubmitOptions) -> TaskHandle {
        let (status_tx, status_rx) = watch::channel(TaskStatus::Pending);
        let cancellation = self.shutdown.child_token();

        let permits = Arc::clone(&self.permits);
        let worker_cancellation = cancellation.clone();
        let worker = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return false;
            };
            if worker_cancellation.is_cancelled() {
                return false;
            }
            job.await;
            true
        });

        let watchdog_cancellation = cancellation.clone();
        let timeout = options.timeout;
        tokio::spawn(async move {
            let status = match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(true)) => TaskStatus::Completed,
                Ok(Ok(false)) => TaskStatus::Skipped,
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "task panicked");
                    TaskStatus::Failed
                }
                Err(_) => {
                    watchdog_cancellation.cancel();
                    tracing::warn!(?timeout, "task exceeded its deadline, cancelling");
                    TaskStatus::TimedOut
                }
            };
            let _ = status_tx.send(status);
        });

        let mut handle = TaskHandle {
            status: status_rx,
            cancellation,
        };
        if options.blocking {
            handle.wait().await;
        }
        handle
    }
}
