//! Task runtime: named tasks, three queues, and a beat scheduler driving
//! several independent `tokio::time::interval`s off one `tokio::select!`.

pub mod beat;
pub mod queue;
pub mod tasks;

use std::sync::Arc;

use crate::config::{Config, Queue};
use queue::QueueRuntime;

/// The three queue runtimes, sized from `Config::queue_concurrency`.
pub struct TaskRuntime {
    pub fast: Arc<QueueRuntime>,
    pub sync: Arc<QueueRuntime>,
    pub backfill: Arc<QueueRuntime>,
}

impl TaskRuntime {
    pub fn new(config: &Config) -> Self {
        Self {
            fast: Arc::new(QueueRuntime::new(Queue::Fast, config.queue_concurrency.fast)),
            sync: Arc::new(QueueRuntime::new(Queue::Sync, config.queue_concurrency.sync)),
            backfill: Arc::new(QueueRuntime::new(
                Queue::Backfill,
                config.queue_concurrency.backfill,
            )),
        }
    }

    pub fn for_queue(&self, queue: Queue) -> &Arc<QueueRuntime> {
        match queue {
            Queue::Fast => &self.fast,
            Queue::Sync => &self.sync,
            Queue::Backfill => &self.backfill,
        }
    }
}
