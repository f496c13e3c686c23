//! The refresh loop.
//!
//! One control task walks the pages of the ranked market list. Each page is
//! fanned out to one writer task per asset and fully joined before the cursor
//! moves. After the last page of a round the pinned ids are fetched one by one
//! and stored the same way, then the loop sleeps for the configured interval.
//!
//! ```text
//! FetchingPage ──ok──▶ FanningOut ──▶ AwaitingBarrier ──▶ FetchingPage (next page)
//!      │                   ▲               │  │
//!    error                 │    last page  │  │ pinned batch joined
//!      │                   │               ▼  │
//!      │                   └──────── FetchingTail
//!      ▼                                      │
//!   Sleeping ◀────────────────────────────────┘
//!      │
//!      └──▶ FetchingPage (cursor unchanged after an error)
//! ```

mod state;

use crate::config::RefreshConfig;
use crate::flatten::flatten;
use crate::market::{AssetSnapshot, FailureKind, FetchError, MarketSource};
use crate::metrics::FetchCounters;
use crate::store::{CacheWriter, WriteReport};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use state::{Batch, BatchReport, CycleState, Phase};

pub struct Coordinator {
    config: RefreshConfig,
    source: Arc<dyn MarketSource>,
    writer: CacheWriter,
    counters: Arc<FetchCounters>,
    permits: Arc<Semaphore>,
    state: CycleState,
}

impl Coordinator {
    pub fn new(
        config: RefreshConfig,
        source: Arc<dyn MarketSource>,
        writer: CacheWriter,
        counters: Arc<FetchCounters>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_inflight_writes));
        let state = CycleState::new(config.max_pages, config.tail.clone());
        Self {
            config,
            source,
            writer,
            counters,
            permits,
            state,
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    /// Drive the loop until `cancel` fires.
    ///
    /// Cancellation interrupts fetches and the pacing sleep. Writers that were
    /// already spawned are always joined first.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            pages = self.config.max_pages,
            pinned = self.config.tail.len(),
            "refresh loop started"
        );

        let mut phase = Phase::FetchingPage;
        while let Some(next) = self.step(phase, &cancel).await {
            phase = next;
        }

        info!("refresh loop stopped");
    }

    /// Perform exactly one transition. `None` means the loop was cancelled.
    pub async fn step(&mut self, phase: Phase, cancel: &CancellationToken) -> Option<Phase> {
        if cancel.is_cancelled() && !matches!(phase, Phase::AwaitingBarrier { .. }) {
            return None;
        }

        match phase {
            Phase::FetchingPage => {
                let page = self.state.page_cursor();
                let fetched = until_cancelled(cancel, self.source.fetch_page(page)).await?;
                match fetched {
                    Ok(snapshots) => {
                        self.counters.record_hit();
                        info!(page, count = snapshots.len(), "retrieved page");
                        Some(Phase::FanningOut {
                            batch: Batch::Page(page),
                            snapshots,
                        })
                    }
                    Err(err) => {
                        self.record_failure(&format!("page {page}"), &err);
                        Some(Phase::Sleeping)
                    }
                }
            }

            Phase::FanningOut { batch, snapshots } => {
                let writers = self.fan_out(snapshots);
                debug!(%batch, writers = writers.len(), "waiting for storage");
                Some(Phase::AwaitingBarrier { batch, writers })
            }

            Phase::AwaitingBarrier { batch, writers } => {
                let report = join_writers(writers).await;
                report.log(batch);

                match batch {
                    Batch::Page(_) => {
                        if self.state.advance() {
                            if self.state.tail().is_empty() {
                                Some(Phase::Sleeping)
                            } else {
                                Some(Phase::FetchingTail)
                            }
                        } else {
                            Some(Phase::FetchingPage)
                        }
                    }
                    Batch::Tail => Some(Phase::Sleeping),
                }
            }

            Phase::FetchingTail => {
                let tail = self.state.tail().to_vec();
                let mut snapshots = Vec::with_capacity(tail.len());
                for id in &tail {
                    match until_cancelled(cancel, self.source.fetch_one(id)).await? {
                        Ok(snapshot) => {
                            self.counters.record_hit();
                            debug!(%id, "retrieved pinned asset");
                            snapshots.push(snapshot);
                        }
                        Err(err) => self.record_failure(id, &err),
                    }
                }
                Some(Phase::FanningOut {
                    batch: Batch::Tail,
                    snapshots,
                })
            }

            Phase::Sleeping => {
                debug!(interval = ?self.config.interval, "sleeping");
                until_cancelled(cancel, tokio::time::sleep(self.config.interval)).await?;
                Some(Phase::FetchingPage)
            }
        }
    }

    /// Spawn one writer per snapshot. At most `max_inflight_writes` of them
    /// talk to the store at any time.
    fn fan_out(&self, snapshots: Vec<AssetSnapshot>) -> JoinSet<WriteReport> {
        let mut writers = JoinSet::new();
        for snapshot in snapshots {
            let writer = self.writer.clone();
            let permits = self.permits.clone();
            let ttl = self.config.ttl;
            writers.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let fields = flatten(&snapshot);
                writer.store_all(&snapshot.id, &fields, ttl).await
            });
        }
        writers
    }

    fn record_failure(&self, what: &str, err: &FetchError) {
        self.counters.record_miss();
        match err.kind() {
            FailureKind::Decode => error!(%what, %err, "upstream payload changed shape"),
            kind => warn!(%what, %kind, %err, "fetch failed"),
        }
    }
}

/// Full join. A slow writer holds up the whole batch.
async fn join_writers(mut writers: JoinSet<WriteReport>) -> BatchReport {
    let mut report = BatchReport::default();
    while let Some(joined) = writers.join_next().await {
        match joined {
            Ok(write) => report.add(write),
            Err(err) => {
                error!(%err, "cache writer task died");
                report.lost_writers += 1;
            }
        }
    }
    report
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests;
