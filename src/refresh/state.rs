use crate::market::AssetSnapshot;
use crate::store::WriteReport;
use std::fmt;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Pagination cursor plus the pinned ids of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleState {
    page_cursor: u32,
    max_pages: u32,
    tail: Vec<String>,
}

impl CycleState {
    pub fn new(max_pages: u32, tail: Vec<String>) -> Self {
        Self {
            page_cursor: 1,
            max_pages: max_pages.max(1),
            tail,
        }
    }

    pub fn page_cursor(&self) -> u32 {
        self.page_cursor
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn tail(&self) -> &[String] {
        &self.tail
    }

    /// Move past the current page. Returns `true` when that completed the
    /// round, in which case the cursor is back at 1.
    pub fn advance(&mut self) -> bool {
        self.page_cursor += 1;
        if self.page_cursor > self.max_pages {
            self.page_cursor = 1;
            true
        } else {
            false
        }
    }
}

/// Which fetch a group of writers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batch {
    Page(u32),
    Tail,
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(n) => write!(f, "page {n}"),
            Self::Tail => f.write_str("pinned assets"),
        }
    }
}

pub enum Phase {
    FetchingPage,
    FanningOut {
        batch: Batch,
        snapshots: Vec<AssetSnapshot>,
    },
    AwaitingBarrier {
        batch: Batch,
        writers: JoinSet<WriteReport>,
    },
    FetchingTail,
    Sleeping,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchingPage => f.write_str("FetchingPage"),
            Self::FanningOut { batch, snapshots } => f
                .debug_struct("FanningOut")
                .field("batch", batch)
                .field("snapshots", &snapshots.len())
                .finish(),
            Self::AwaitingBarrier { batch, writers } => f
                .debug_struct("AwaitingBarrier")
                .field("batch", batch)
                .field("writers", &writers.len())
                .finish(),
            Self::FetchingTail => f.write_str("FetchingTail"),
            Self::Sleeping => f.write_str("Sleeping"),
        }
    }
}

/// Aggregate of every [`WriteReport`] joined at one barrier.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub assets: usize,
    pub fields_written: usize,
    pub fields_failed: usize,
    pub failed_assets: Vec<String>,
    /// Writer tasks that panicked before reporting.
    pub lost_writers: usize,
}

impl BatchReport {
    pub fn add(&mut self, report: WriteReport) {
        self.assets += 1;
        self.fields_written += report.written;
        self.fields_failed += report.failures.len();
        if !report.is_complete() {
            self.failed_assets.push(report.owner_id);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.fields_failed == 0 && self.lost_writers == 0
    }

    pub(crate) fn log(&self, batch: Batch) {
        if self.is_clean() {
            info!(
                %batch,
                assets = self.assets,
                fields = self.fields_written,
                "stored"
            );
        } else {
            warn!(
                %batch,
                assets = self.assets,
                fields = self.fields_written,
                failed_fields = self.fields_failed,
                failed_assets = ?self.failed_assets,
                lost_writers = self.lost_writers,
                "stored with failures"
            );
        }
    }
}
