//! Dispatcher.
//!
//! Periodic fan-out: list active shops from OLTP, resolve credentials,
//! `delay()` the right per-shop task onto the right queue — with a
//! dedup lock so a slow previous run doesn't get double-enqueued.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Queue;
use crate::runtime::queue::{Task, TaskContext};
use crate::runtime::TaskRuntime;
use crate::state::StateStore;

pub struct Dispatcher {
    oltp: PgPool,
    state: StateStore,
    runtime: Arc<TaskRuntime>,
}

impl Dispatcher {
    pub fn new(oltp: PgPool, state: StateStore, runtime: Arc<TaskRuntime>) -> Self {
        Self {
            oltp,
            state,
            runtime,
        }
    }

    async fn active_shop_ids(&self) -> anyhow::Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM shops WHERE status = 'active'")
                .fetch_all(&self.oltp)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Dispatch `task` for every active shop, on `task`'s routed queue.
    /// `shop_id` is injected into the task context exactly once, by
    /// `TaskContext` — never duplicated into a second positional slot.
    pub async fn dispatch_for_all_active_shops(
        &self,
        task_name: &'static str,
        queue: Queue,
        make_task: impl Fn() -> Arc<dyn Task>,
    ) -> anyhow::Result<usize> {
        let shop_ids = self.active_shop_ids().await?;
        let hard_limit_secs = crate::config::queue_time_limits(queue).1.as_secs();
        let mut dispatched = 0;

        for shop_id in shop_ids {
            let acquired = self
                .state
                .acquire_task_lock(task_name, shop_id, hard_limit_secs)
                .await?;
            if !acquired {
                tracing::debug!(task = task_name, shop_id, "skipping dispatch: already running");
                continue;
            }

            let ctx = TaskContext {
                shop_id: Some(shop_id),
            };
            let runtime = self.runtime.for_queue(queue).clone();
            let task = make_task();
            let state = self.state.clone();
            let task_name_owned = task_name;

            runtime.delay(
                Arc::new(ReleasingTask {
                    inner: task,
                    state,
                    task_name: task_name_owned,
                    shop_id,
                }),
                ctx,
            );
            dispatched += 1;
        }

        Ok(dispatched)
    }
}

/// Wraps a task so the dedup lock is always released after the run,
/// success or failure — the "post-run signal" this protocol requires.
struct ReleasingTask {
    inner: Arc<dyn Task>,
    state: StateStore,
    task_name: &'static str,
    shop_id: i64,
}

impl Task for ReleasingTask {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn run(&self, ctx: TaskContext) -> crate::runtime::queue::TaskFuture {
        let inner = self.inner.clone();
        let guard = DedupLockGuard {
            state: self.state.clone(),
            task_name: self.task_name,
            shop_id: self.shop_id,
        };
        Box::pin(async move {
            let result = inner.run(ctx).await;
            drop(guard);
            result
        })
    }
}

/// Releases the dedup lock when dropped, including when the holding
/// future is cancelled mid-await (a hard task timeout) rather than only
/// on normal completion — the queue runtime aborts the future outright on
/// a hard timeout, so anything after the last `.await` never runs unless
/// it lives in a `Drop` impl instead.
struct DedupLockGuard {
    state: StateStore,
    task_name: &'static str,
    shop_id: i64,
}

impl Drop for DedupLockGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let task_name = self.task_name;
        let shop_id = self.shop_id;
        tokio::spawn(async move {
            if let Err(err) = state.release_task_lock(task_name, shop_id).await {
                tracing::warn!(task = task_name, shop_id, %err, "failed to release dedup lock");
            }
        });
    }
}
