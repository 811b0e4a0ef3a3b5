//! Background image loading.
//!
//! [`BackgroundLoader`] owns a table of cancellable, progress-tracked tasks.
//! Each task fetches the images of the resolved cards it was started with
//! (the *selected* phase), then pre-fetches the front image of every other
//! printing of the same cards (the *alternatives* phase), then completes.
//!
//! All public operations are non-blocking: `start` spawns the worker and
//! returns, `progress` and `is_finished` read a snapshot, `cancel` only sets
//! the task's cancellation token. Downloads are shared across tasks through
//! [`ImageFetcher`], so two tasks referencing the same URL fetch it once.
//!
//! Completed tasks are reaped when a caller observes them as finished, and
//! otherwise aged out on the next `start`.

mod fetcher;
mod progress;
mod table;
mod worker;

pub use fetcher::{FetchOutcome, ImageFetcher};
pub use progress::{LoadPhase, LoadProgress, ProgressState};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::card::ResolvedCard;
use crate::catalog::PrintingSearch;
use crate::config::EngineConfig;
use crate::error::LoaderError;
use table::TaskTable;
use worker::LoadJob;

/// Identifier of one background load. Never `0`, never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskHandle {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tuning for the loader, taken from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub max_concurrent_fetches: usize,
    pub completed_task_ttl: Duration,
    pub max_retained_completed: usize,
}

impl From<&EngineConfig> for LoaderSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            completed_task_ttl: config.completed_task_ttl,
            max_retained_completed: config.max_retained_completed,
        }
    }
}

pub struct BackgroundLoader {
    table: Arc<Mutex<TaskTable>>,
    fetcher: Arc<ImageFetcher>,
    search: Arc<PrintingSearch>,
    runtime: Handle,
    settings: LoaderSettings,
}

impl BackgroundLoader {
    pub fn new(
        fetcher: Arc<ImageFetcher>,
        search: Arc<PrintingSearch>,
        runtime: Handle,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(TaskTable::default())),
            fetcher,
            search,
            runtime,
            settings,
        }
    }

    /// Start loading the images for `cards` and return immediately.
    pub fn start(&self, cards: Vec<ResolvedCard>) -> Result<TaskHandle, LoaderError> {
        if cards.is_empty() {
            return Err(LoaderError::EmptyRequest);
        }

        let progress = Arc::new(ProgressState::new(cards.len()));
        let cancel = CancellationToken::new();

        let handle = {
            let mut table = self.table.lock();
            let reaped = table.sweep(
                Instant::now(),
                self.settings.completed_task_ttl,
                self.settings.max_retained_completed,
            );
            if reaped > 0 {
                debug!(reaped, "Reaped completed background tasks");
            }
            table.insert(Arc::clone(&progress), cancel.clone())
        };

        let job = LoadJob {
            handle,
            cards,
            progress,
            cancel,
            fetcher: Arc::clone(&self.fetcher),
            search: Arc::clone(&self.search),
            table: Arc::clone(&self.table),
            max_concurrent: self.settings.max_concurrent_fetches,
        };
        self.runtime.spawn(job.run());

        Ok(TaskHandle(handle))
    }

    /// Snapshot of a task's progress, or `None` for an unknown handle.
    pub fn progress(&self, handle: TaskHandle) -> Option<LoadProgress> {
        self.table.lock().get(handle.0).map(|r| r.progress.snapshot())
    }

    /// Request cooperative cancellation. Returns once the flag is set.
    pub fn cancel(&self, handle: TaskHandle) -> Result<(), LoaderError> {
        let table = self.table.lock();
        let record = table.get(handle.0).ok_or(LoaderError::UnknownHandle(handle.0))?;
        if !record.cancel.is_cancelled() {
            info!(handle = handle.0, "Cancelling background load");
            record.cancel.cancel();
        }
        Ok(())
    }

    /// Whether the task has completed. A task observed as finished is reaped,
    /// so later calls with the same handle report it as unknown.
    pub fn is_finished(&self, handle: TaskHandle) -> Result<bool, LoaderError> {
        let mut table = self.table.lock();
        let record = table.get(handle.0).ok_or(LoaderError::UnknownHandle(handle.0))?;
        if record.progress.phase() != LoadPhase::Completed {
            return Ok(false);
        }
        table.remove(handle.0);
        debug!(handle = handle.0, "Reaped finished background task");
        Ok(true)
    }

    /// Cancel every live task.
    pub fn cancel_all(&self) {
        let table = self.table.lock();
        for record in table.records() {
            record.cancel.cancel();
        }
    }

    /// Number of tasks in the table, running or awaiting reaping.
    pub fn task_count(&self) -> usize {
        self.table.lock().len()
    }

    pub fn fetcher(&self) -> &Arc<ImageFetcher> {
        &self.fetcher
    }
}
