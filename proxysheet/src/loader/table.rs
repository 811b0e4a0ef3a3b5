//! Arena of live background tasks.
//!
//! Records live in a growable slot vector. A freed slot is reused for the
//! next task, but handle values come from a monotonically increasing counter
//! and are never issued twice. Handle `0` is never issued so C callers can
//! use it as "no task".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::progress::ProgressState;

/// Bookkeeping for one task.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub handle: u64,
    pub progress: Arc<ProgressState>,
    pub cancel: CancellationToken,
    pub completed_at: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct TaskTable {
    slots: Vec<Option<TaskRecord>>,
    free: Vec<usize>,
    index: HashMap<u64, usize>,
    next_handle: u64,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_handle: 1,
        }
    }
}

impl TaskTable {
    /// Store a new task and return its fresh handle.
    pub fn insert(&mut self, progress: Arc<ProgressState>, cancel: CancellationToken) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;

        let record = TaskRecord {
            handle,
            progress,
            cancel,
            completed_at: None,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        self.index.insert(handle, slot);
        handle
    }

    pub fn get(&self, handle: u64) -> Option<&TaskRecord> {
        let slot = *self.index.get(&handle)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn remove(&mut self, handle: u64) -> Option<TaskRecord> {
        let slot = self.index.remove(&handle)?;
        let record = self.slots.get_mut(slot)?.take();
        self.free.push(slot);
        record
    }

    /// Stamp the completion time used by [`sweep`](Self::sweep).
    pub fn mark_completed(&mut self, handle: u64, at: Instant) {
        if let Some(&slot) = self.index.get(&handle) {
            if let Some(Some(record)) = self.slots.get_mut(slot) {
                record.completed_at.get_or_insert(at);
            }
        }
    }

    /// Drop completed tasks nobody came back for.
    ///
    /// Removes tasks completed longer than `ttl` ago, then the oldest
    /// completed tasks beyond `max_retained`. Running tasks are never touched.
    /// Returns the number of tasks removed.
    pub fn sweep(&mut self, now: Instant, ttl: Duration, max_retained: usize) -> usize {
        let mut completed: Vec<(Instant, u64)> = self
            .slots
            .iter()
            .flatten()
            .filter_map(|r| r.completed_at.map(|at| (at, r.handle)))
            .collect();
        completed.sort();

        let mut expired: Vec<u64> = completed
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) >= ttl)
            .map(|&(_, handle)| handle)
            .collect();

        let survivors = completed.len() - expired.len();
        if survivors > max_retained {
            let excess = survivors - max_retained;
            expired.extend(
                completed
                    .iter()
                    .filter(|(at, _)| now.saturating_duration_since(*at) < ttl)
                    .take(excess)
                    .map(|&(_, handle)| handle),
            );
        }

        for handle in &expired {
            self.remove(*handle);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of allocated slots, free or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.slots.iter().flatten()
    }
}
