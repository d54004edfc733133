//! Task trait and the three queue worker pools.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::{queue_time_limits, Queue};
use crate::error::IngestError;

/// Context passed to every task invocation. Workers re-acquire external
/// connections on every task rather than holding them across calls, so a
/// backend restart only fails the in-flight task, not the worker.
#[derive(Clone)]
pub struct TaskContext {
    pub shop_id: Option<i64>,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send>>;

/// A routable unit of work. `name` determines queue routing via
/// `route_queue`; `run` does the actual work.
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: TaskContext) -> TaskFuture;
}

/// Declarative name-pattern → queue routing, shared by `delay()`/`apply()`
/// and the beat scheduler so they never disagree about where a task runs.
pub fn route_queue(task_name: &str) -> Queue {
    if task_name.starts_with("update_") || task_name.starts_with("check_") {
        Queue::Fast
    } else if task_name.starts_with("backfill_") {
        Queue::Backfill
    } else {
        Queue::Sync
    }
}

/// One worker pool bound to a single queue's concurrency limit.
pub struct QueueRuntime {
    queue: Queue,
    semaphore: Arc<Semaphore>,
}

impl QueueRuntime {
    pub fn new(queue: Queue, concurrency: usize) -> Self {
        Self {
            queue,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Fire-and-forget: spawn the task, bounded by this queue's
    /// concurrency and enforcing its soft/hard time limits. The hard
    /// limit drops the task's future outright, so any cleanup a `Task`
    /// needs on cancellation (releasing a dedup lock or distributed lock)
    /// must live in a `Drop` guard owned by the future, not in code after
    /// its last `.await` — see `dispatcher::DedupLockGuard` and
    /// `orchestrator::OrchestratorLockGuard`.
    pub fn delay(&self, task: Arc<dyn Task>, ctx: TaskContext) {
        let semaphore = self.semaphore.clone();
        let (soft, hard) = queue_time_limits(self.queue);
        let queue = self.queue;
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let task_name = task.name();
            let started = tokio::time::Instant::now();
            match timeout(hard, task.run(ctx)).await {
                Ok(Ok(())) => {
                    if started.elapsed() > soft {
                        tracing::warn!(task = task_name, %queue, elapsed = ?started.elapsed(), "task exceeded soft time limit");
                    }
                }
                Ok(Err(err)) => {
                    tracing::error!(task = task_name, %queue, %err, "task failed");
                }
                Err(_) => {
                    tracing::error!(task = task_name, %queue, hard_limit = ?hard, "task exceeded hard time limit, aborted");
                }
            }
        });
    }

    /// In-process synchronous execution with full task context. Unlike
    /// `delay`, the caller awaits the result directly.
    pub async fn apply(&self, task: Arc<dyn Task>, ctx: TaskContext) -> Result<(), IngestError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");
        let (_, hard) = queue_time_limits(self.queue);
        let task_name = task.name().to_string();
        match timeout(hard, task.run(ctx.clone())).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::Fatal {
                task: task_name,
                shop_id: ctx.shop_id,
                source: anyhow::anyhow!("exceeded hard time limit of {hard:?}"),
            }),
        }
    }
}
