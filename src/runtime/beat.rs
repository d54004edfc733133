//! Beat scheduler: drives the dispatcher off six independent timers on one
//! `tokio::select!`.

use std::sync::Arc;

use chrono::Timelike;
use tokio::time::{interval, Duration};

use crate::config::Queue;
use crate::dispatcher::Dispatcher;
use crate::runtime::tasks::{
    CheckAllPositionsTask, SyncAllAdsTask, SyncAllCampaignSnapshotsTask, SyncAllDailyTask,
    SyncAllFrequentTask, TaskDeps, UpdateAllBidsTask,
};

pub struct BeatScheduler {
    dispatcher: Arc<Dispatcher>,
    task_deps: TaskDeps,
}

impl BeatScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, task_deps: TaskDeps) -> Self {
        Self {
            dispatcher,
            task_deps,
        }
    }

    pub async fn run(&self) {
        tracing::info!("beat scheduler starting");

        let mut bids_interval = interval(Duration::from_secs(60));
        let mut positions_interval = interval(Duration::from_secs(5 * 60));
        let mut frequent_interval = interval(Duration::from_secs(30 * 60));
        let mut ads_interval = interval(Duration::from_secs(60 * 60));
        let mut campaign_snapshot_interval = interval(Duration::from_secs(30 * 60));
        let mut daily_check_interval = interval(Duration::from_secs(60));

        let mut last_daily_run_date = None;

        loop {
            tokio::select! {
                _ = bids_interval.tick() => {
                    self.fan_out("update_all_bids", Queue::Fast, || {
                        Arc::new(UpdateAllBidsTask { deps: self.task_deps.clone() })
                    }).await;
                }
                _ = positions_interval.tick() => {
                    self.fan_out("check_all_positions", Queue::Fast, || {
                        Arc::new(CheckAllPositionsTask { deps: self.task_deps.clone() })
                    }).await;
                }
                _ = frequent_interval.tick() => {
                    self.fan_out("sync_all_frequent", Queue::Sync, || {
                        Arc::new(SyncAllFrequentTask { deps: self.task_deps.clone() })
                    }).await;
                }
                _ = ads_interval.tick() => {
                    self.fan_out("sync_all_ads", Queue::Sync, || {
                        Arc::new(SyncAllAdsTask { deps: self.task_deps.clone() })
                    }).await;
                }
                _ = campaign_snapshot_interval.tick() => {
                    self.fan_out("sync_all_campaign_snapshots", Queue::Sync, || {
                        Arc::new(SyncAllCampaignSnapshotsTask { deps: self.task_deps.clone() })
                    }).await;
                }
                _ = daily_check_interval.tick() => {
                    let now = chrono::Utc::now();
                    let today = now.date_naive();
                    if now.hour() == 3 && last_daily_run_date != Some(today) {
                        last_daily_run_date = Some(today);
                        self.fan_out("sync_all_daily", Queue::Sync, || {
                            Arc::new(SyncAllDailyTask { deps: self.task_deps.clone() })
                        }).await;
                    }
                }
            }
        }
    }

    async fn fan_out(
        &self,
        task_name: &'static str,
        queue: Queue,
        make_task: impl Fn() -> Arc<dyn crate::runtime::queue::Task>,
    ) {
        match self
            .dispatcher
            .dispatch_for_all_active_shops(task_name, queue, make_task)
            .await
        {
            Ok(count) => tracing::debug!(task = task_name, count, "beat dispatch complete"),
            Err(err) => tracing::error!(task = task_name, %err, "beat dispatch failed"),
        }
    }
}
