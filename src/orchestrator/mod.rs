//! Orchestrator: ordered historical backfill chains with
//! progress reporting and a distributed run lock.

pub mod ozon;
pub mod wildberries;

use std::sync::Arc;

use chrono::Utc;

use crate::client::MarketplaceClient;
use crate::credentials::CredentialStore;
use crate::error::IngestError;
use crate::loaders::{OlapLoader, OltpLoader};
use crate::models::MarketplaceKind;
use crate::state::{ProgressRecord, ProgressStatus, StateStore};

const LOCK_TTL_SECS: u64 = 4 * 3600;

/// Shared dependencies every backfill step needs. Cloned into each step
/// at chain-construction time rather than threaded through `run`'s
/// signature, since the step count and shapes differ per marketplace.
#[derive(Clone)]
pub struct StepDeps {
    pub client: Arc<MarketplaceClient>,
    pub credentials: Arc<CredentialStore>,
    pub oltp: Arc<OltpLoader>,
    pub olap: Arc<OlapLoader>,
    pub state: StateStore,
}

/// One ordered unit of the backfill chain for a marketplace.
#[async_trait::async_trait]
pub trait BackfillStep: Send + Sync {
    fn name(&self) -> &'static str;
    /// Run the step; `sub_progress` lets long steps report "Week 14 of
    /// 27"-style progress back into the shared Progress Record.
    async fn run(
        &self,
        shop_id: i64,
        sub_progress: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<(), IngestError>;
}

#[derive(Debug)]
pub enum RunOutcome {
    Done,
    DoneWithErrors,
    SkippedAlreadyRunning,
}

/// Render a JSON id field (string or number) as a plain string.
pub(crate) fn value_as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build idempotent dimension rows from a items array, keyed by the first
/// identifier field present. Items missing every candidate field still
/// land under a per-chunk positional key rather than being silently
/// dropped.
pub(crate) fn dimension_rows(
    shop_id: i64,
    items: &[serde_json::Value],
    id_fields: &[&str],
    fallback_prefix: &str,
) -> Vec<crate::models::DimensionRow> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let external_id = id_fields
                .iter()
                .find_map(|f| item.get(*f))
                .and_then(value_as_id)
                .unwrap_or_else(|| format!("{fallback_prefix}:{i}"));
            crate::models::DimensionRow {
                shop_id,
                external_id,
                payload: item.clone(),
            }
        })
        .collect()
}

/// Releases the per-shop orchestrator lock when dropped, including when
/// the holding future is cancelled mid-await (a hard task timeout), so a
/// backfill killed mid-chain doesn't leave the shop permanently locked.
struct OrchestratorLockGuard {
    state: StateStore,
    shop_id: i64,
}

impl Drop for OrchestratorLockGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let shop_id = self.shop_id;
        tokio::spawn(async move {
            if let Err(err) = state.release_orchestrator_lock(shop_id).await {
                tracing::warn!(shop_id, %err, "failed to release orchestrator lock");
            }
        });
    }
}

pub struct Orchestrator {
    state: StateStore,
    deps: StepDeps,
}

impl Orchestrator {
    pub fn new(state: StateStore, deps: StepDeps) -> Self {
        Self { state, deps }
    }

    pub fn chain_for(marketplace: MarketplaceKind, deps: &StepDeps) -> Vec<Arc<dyn BackfillStep>> {
        match marketplace {
            MarketplaceKind::Wildberries => wildberries::chain(deps),
            MarketplaceKind::Ozon => ozon::chain(deps),
        }
    }

    /// Run the ordered chain for `shop_id`, guarded by the per-shop
    /// distributed lock. A duplicate request while a run is in flight
    /// returns `SkippedAlreadyRunning` without doing any work.
    pub async fn run_backfill(
        &self,
        shop_id: i64,
        marketplace: MarketplaceKind,
    ) -> Result<RunOutcome, IngestError> {
        let acquired = self
            .state
            .acquire_orchestrator_lock(shop_id, LOCK_TTL_SECS)
            .await?;
        if !acquired {
            return Ok(RunOutcome::SkippedAlreadyRunning);
        }

        let _guard = OrchestratorLockGuard {
            state: self.state.clone(),
            shop_id,
        };
        self.run_chain_locked(shop_id, marketplace).await
    }

    async fn run_chain_locked(
        &self,
        shop_id: i64,
        marketplace: MarketplaceKind,
    ) -> Result<RunOutcome, IngestError> {
        let steps = Self::chain_for(marketplace, &self.deps);
        let total_steps = steps.len() as u32;
        let started_at = Utc::now();
        let mut any_step_failed = false;

        for (i, step) in steps.iter().enumerate() {
            let current_step = i as u32 + 1;
            self.write_progress(
                shop_id,
                ProgressRecord {
                    current_step,
                    total_steps,
                    step_name: step.name().to_string(),
                    sub_progress: None,
                    percent: ProgressRecord::percent_for_step(current_step, total_steps),
                    status: ProgressStatus::Loading,
                    error: None,
                    started_at,
                    updated_at: Utc::now(),
                },
            )
            .await?;

            let state = self.state.clone();
            let step_name = step.name().to_string();
            let sub_progress_shop_id = shop_id;
            let sub_progress_total = total_steps;
            let sub_progress_started_at = started_at;
            let sub_progress_cb: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |text: String| {
                let state = state.clone();
                let step_name = step_name.clone();
                tokio::spawn(async move {
                    let record = ProgressRecord {
                        current_step,
                        total_steps: sub_progress_total,
                        step_name,
                        sub_progress: Some(text),
                        percent: ProgressRecord::percent_for_step(current_step, sub_progress_total),
                        status: ProgressStatus::Loading,
                        error: None,
                        started_at: sub_progress_started_at,
                        updated_at: Utc::now(),
                    };
                    let _ = state.set_progress(sub_progress_shop_id, &record).await;
                });
            });

            if let Err(err) = step.run(shop_id, sub_progress_cb).await {
                any_step_failed = true;
                tracing::warn!(shop_id, step = step.name(), %err, "backfill step failed, continuing chain");
                self.write_progress(
                    shop_id,
                    ProgressRecord {
                        current_step,
                        total_steps,
                        step_name: step.name().to_string(),
                        sub_progress: None,
                        percent: ProgressRecord::percent_for_step(current_step, total_steps),
                        status: ProgressStatus::Error,
                        error: Some(err.to_string()),
                        started_at,
                        updated_at: Utc::now(),
                    },
                )
                .await?;
            }
        }

        let final_status = if any_step_failed {
            ProgressStatus::DoneWithErrors
        } else {
            ProgressStatus::Done
        };
        self.write_progress(
            shop_id,
            ProgressRecord {
                current_step: total_steps,
                total_steps,
                step_name: "complete".to_string(),
                sub_progress: None,
                percent: 100,
                status: final_status,
                error: None,
                started_at,
                updated_at: Utc::now(),
            },
        )
        .await?;

        Ok(if any_step_failed {
            RunOutcome::DoneWithErrors
        } else {
            RunOutcome::Done
        })
    }

    async fn write_progress(&self, shop_id: i64, record: ProgressRecord) -> Result<(), IngestError> {
        self.state.set_progress(shop_id, &record).await
    }
}

/// Early-exit tracker for chunked scans: stops after `limit` consecutive
/// empty chunks. An error counts as empty (doesn't reset the streak);
/// finding data resets it to zero.
pub struct EmptyStreak {
    count: u32,
    limit: u32,
}

impl EmptyStreak {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    pub fn record(&mut self, found_rows: bool) {
        if found_rows {
            self.count = 0;
        } else {
            self.count += 1;
        }
    }

    pub fn should_stop(&self) -> bool {
        self.count >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_streak_stops_after_limit() {
        let mut streak = EmptyStreak::new(3);
        streak.record(false);
        streak.record(false);
        assert!(!streak.should_stop());
        streak.record(false);
        assert!(streak.should_stop());
    }

    #[test]
    fn finding_data_resets_streak() {
        let mut streak = EmptyStreak::new(2);
        streak.record(false);
        streak.record(true);
        assert!(!streak.should_stop());
    }

    #[test]
    fn percent_caps_at_99_until_done() {
        assert_eq!(ProgressRecord::percent_for_step(1, 7), 0);
        assert_eq!(ProgressRecord::percent_for_step(7, 7), 85);
    }
}
