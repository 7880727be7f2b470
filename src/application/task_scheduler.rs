//! Bounded-concurrency dispatch of source items
//!
//! Items already in the checkpoint are never dispatched. Up to `concurrency`
//! items are in flight at once; results come back in completion order and
//! are merged by the single loop that owns the store. Every
//! `checkpoint_every` merges that loop serializes a snapshot and hands the
//! file write to a background task, at most one write in flight.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{CompletedIdSet, ItemOutcome, ResultStore, SkipReason, SourceItem};
use crate::infrastructure::CheckpointStore;
use crate::infrastructure::checkpoint_store::to_checkpoint_json;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{Sleeper, TokioSleeper};

/// Turns one source item into an outcome
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &SourceItem, cancel: &CancellationToken) -> ItemOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    pub checkpoint_every: usize,
    pub jitter_max: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.scheduler.concurrency.max(1),
            checkpoint_every: config.output.checkpoint_every.max(1),
            jitter_max: config.scheduler.jitter_max(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What a run did. `store` holds prior records plus everything merged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    #[serde(skip)]
    pub store: ResultStore,
    pub total_items: usize,
    /// Excluded at dispatch time because the checkpoint already had them
    pub filtered: usize,
    pub dispatched: usize,
    pub merged: usize,
    pub skipped: usize,
    pub checkpoints_written: usize,
    pub aborted: Option<String>,
    pub cancelled: bool,
}

pub struct TaskScheduler {
    processor: Arc<dyn ItemProcessor>,
    settings: SchedulerSettings,
    sleeper: Arc<dyn Sleeper>,
    checkpoint: Option<CheckpointStore>,
}

impl TaskScheduler {
    pub fn new(processor: Arc<dyn ItemProcessor>, settings: SchedulerSettings) -> Self {
        Self {
            processor,
            settings,
            sleeper: Arc::new(TokioSleeper),
            checkpoint: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Periodic checkpoints go here. Without one, nothing is written mid-run.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointStore) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        items: Vec<SourceItem>,
        completed: Arc<CompletedIdSet>,
        store: ResultStore,
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut report = RunReport {
            total_items: items.len(),
            ..Default::default()
        };

        let pending: Vec<SourceItem> = items
            .into_iter()
            .filter(|item| !completed.contains(item.id()))
            .collect();
        report.filtered = report.total_items - pending.len();
        info!(
            "🚀 Scheduling {} items ({} already completed, concurrency {})",
            pending.len(),
            report.filtered,
            self.settings.concurrency
        );

        // Cancelled by a fatal outcome; in-flight items still finish
        let stop_dispatch = cancel.child_token();
        let dispatched = AtomicUsize::new(0);

        let gate = stop_dispatch.clone();
        let results = stream::iter(pending)
            .take_while(move |_| future::ready(!gate.is_cancelled()))
            .map(|item| self.process_item(item, &completed, &dispatched, cancel))
            .buffer_unordered(self.settings.concurrency);
        let mut results = pin!(results);

        let mut store = store;
        let mut pending_write: Option<JoinHandle<anyhow::Result<usize>>> = None;
        while let Some((item, outcome)) = results.next().await {
            match outcome {
                ItemOutcome::Extracted(record) => {
                    if store.merge(item.id(), record).is_some() {
                        debug!("Replaced existing record for {}", item.id());
                    }
                    report.merged += 1;
                    debug!("✅ {} extracted ({} merged)", item.id(), report.merged);

                    if report.merged % self.settings.checkpoint_every == 0 {
                        if let Some(write) = pending_write.take() {
                            Self::finish_checkpoint(write, &mut report).await;
                        }
                        pending_write = self.start_checkpoint(&store);
                    }
                }
                ItemOutcome::Skipped(SkipReason::AlreadyCompleted) => {
                    report.skipped += 1;
                    debug!("{} skipped: already completed", item.id());
                }
                ItemOutcome::Skipped(reason) => {
                    report.skipped += 1;
                    warn!("{} skipped: {}", item.id(), reason);
                }
                ItemOutcome::Fatal(reason) => {
                    error!("❌ Fatal error on {}: {}; no further items will be dispatched", item.id(), reason);
                    report.aborted.get_or_insert(reason);
                    stop_dispatch.cancel();
                }
            }
        }

        if let Some(write) = pending_write.take() {
            Self::finish_checkpoint(write, &mut report).await;
        }

        report.dispatched = dispatched.load(Ordering::Relaxed);
        report.cancelled = cancel.is_cancelled();
        report.store = store;
        info!(
            "Run finished: {} dispatched, {} merged, {} skipped, {} checkpoints",
            report.dispatched, report.merged, report.skipped, report.checkpoints_written
        );
        report
    }

    async fn process_item(
        &self,
        item: SourceItem,
        completed: &CompletedIdSet,
        dispatched: &AtomicUsize,
        cancel: &CancellationToken,
    ) -> (SourceItem, ItemOutcome) {
        if completed.contains(item.id()) {
            return (item, ItemOutcome::Skipped(SkipReason::AlreadyCompleted));
        }
        dispatched.fetch_add(1, Ordering::Relaxed);

        let jitter = random_jitter(self.settings.jitter_max);
        if !jitter.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => {
                    return (item, ItemOutcome::Skipped(SkipReason::FetchAbandoned("run cancelled".to_string())));
                }
                () = self.sleeper.sleep(jitter) => {}
            }
        }

        let outcome = self.processor.process(&item, cancel).await;
        (item, outcome)
    }

    /// Snapshot the store now, write it in the background
    fn start_checkpoint(&self, store: &ResultStore) -> Option<JoinHandle<anyhow::Result<usize>>> {
        let checkpoint = self.checkpoint.clone()?;
        let bytes = match to_checkpoint_json(store) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Checkpoint serialization failed, continuing: {}", e);
                return None;
            }
        };
        let records = store.len();
        Some(tokio::spawn(async move {
            checkpoint.write_snapshot(&bytes).await?;
            Ok(records)
        }))
    }

    async fn finish_checkpoint(write: JoinHandle<anyhow::Result<usize>>, report: &mut RunReport) {
        match write.await {
            Ok(Ok(records)) => {
                report.checkpoints_written += 1;
                info!(
                    "💾 Checkpoint {} written ({} records)",
                    report.checkpoints_written, records
                );
            }
            Ok(Err(e)) => error!("Checkpoint write failed, continuing: {:#}", e),
            Err(e) => error!("Checkpoint task failed, continuing: {}", e),
        }
    }
}

/// Uniform pause in `[0, max]`
fn random_jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(0..=max_ms))
}
