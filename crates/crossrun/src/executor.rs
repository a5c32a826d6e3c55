//! # Execution Contexts
//!
//! Inbound work runs in one of two places:
//!
//! - the **primary** executor: a single task that runs jobs strictly one at a time, in
//!   submission order, standing in for a process's designated primary thread;
//! - the **worker** pool: independent tasks bounded by a semaphore.
//!
//! Jobs can ask where they are running with [`current_context`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExecContext {
    Primary,
    Worker,
}

tokio::task_local! {
    static EXEC_CONTEXT: ExecContext;
}

/// Returns the context of the running job, or `None` outside any executor.
pub fn current_context() -> Option<ExecContext> {
    EXEC_CONTEXT.try_with(|ctx| *ctx).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The primary executor has shut down.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Primary executor closed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The single serial executor bound to the primary context.
pub struct PrimaryExecutor {
    tx: mpsc::UnboundedSender<Job>,
    pump: JoinHandle<()>,
}

impl PrimaryExecutor {
    /// Spawns the executor loop. Must be called within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pump = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                EXEC_CONTEXT.scope(ExecContext::Primary, job).await;
            }
        });
        Self { tx, pump }
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| Error::Closed)
    }
}

impl Drop for PrimaryExecutor {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Independent worker jobs, at most `limit` running at once.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub fn submit(&self, job: Job) -> JoinHandle<()> {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // Acquisition only fails on a closed semaphore, and this one is never closed.
            let Ok(_permit) = permits.acquire_owned().await else { return };
            EXEC_CONTEXT.scope(ExecContext::Worker, job).await;
        })
    }
}

/// Both execution contexts of one process.
pub struct Executors {
    primary: PrimaryExecutor,
    workers: WorkerPool,
}

impl Executors {
    pub fn new(worker_limit: usize) -> Self {
        Self {
            primary: PrimaryExecutor::spawn(),
            workers: WorkerPool::new(worker_limit),
        }
    }

    pub fn submit(&self, context: ExecContext, job: Job) -> Result<()> {
        match context {
            ExecContext::Primary => self.primary.submit(job),
            ExecContext::Worker => {
                self.workers.submit(job);
                Ok(())
            }
        }
    }
}
