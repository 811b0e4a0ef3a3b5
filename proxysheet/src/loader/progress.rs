//! Progress counters shared between a worker and its pollers.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Phase of a background load. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadPhase {
    /// Fetching the images of the resolved printings.
    Selected,
    /// Pre-fetching every other printing of the same cards.
    Alternatives,
    /// Done, failed partway, or cancelled.
    Completed,
}

impl LoadPhase {
    /// Numeric value used at the C boundary.
    pub fn as_i32(self) -> i32 {
        match self {
            LoadPhase::Selected => 0,
            LoadPhase::Alternatives => 1,
            LoadPhase::Completed => 2,
        }
    }

    fn as_u8(self) -> u8 {
        self.as_i32() as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoadPhase::Selected,
            1 => LoadPhase::Alternatives,
            _ => LoadPhase::Completed,
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::Selected => write!(f, "selected"),
            LoadPhase::Alternatives => write!(f, "alternatives"),
            LoadPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Point-in-time copy of a task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub phase: LoadPhase,
    pub current_entry: usize,
    pub total_entries: usize,
    pub selected_loaded: usize,
    pub alternatives_loaded: usize,
    pub total_alternatives: usize,
    pub error_count: usize,
}

impl LoadProgress {
    pub fn is_finished(&self) -> bool {
        self.phase == LoadPhase::Completed
    }
}

/// Live counters. Written by the task's worker only; read by anyone.
///
/// Every counter is monotonically non-decreasing and `current_entry` never
/// passes `total_entries`.
#[derive(Debug)]
pub struct ProgressState {
    phase: AtomicU8,
    current_entry: AtomicUsize,
    total_entries: usize,
    selected_loaded: AtomicUsize,
    alternatives_loaded: AtomicUsize,
    total_alternatives: AtomicUsize,
    error_count: AtomicUsize,
}

impl ProgressState {
    pub fn new(total_entries: usize) -> Self {
        Self {
            phase: AtomicU8::new(LoadPhase::Selected.as_u8()),
            current_entry: AtomicUsize::new(0),
            total_entries,
            selected_loaded: AtomicUsize::new(0),
            alternatives_loaded: AtomicUsize::new(0),
            total_alternatives: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        LoadPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move to `phase` if it is later than the current one.
    pub fn advance_to(&self, phase: LoadPhase) {
        self.phase.fetch_max(phase.as_u8(), Ordering::AcqRel);
    }

    pub fn entry_done(&self, loaded: bool) {
        if loaded {
            self.selected_loaded.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self
            .current_entry
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.total_entries).then_some(current + 1)
            });
    }

    pub fn set_total_alternatives(&self, total: usize) {
        self.total_alternatives.fetch_max(total, Ordering::Relaxed);
    }

    pub fn alternative_loaded(&self) {
        self.alternatives_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoadProgress {
        LoadProgress {
            phase: self.phase(),
            current_entry: self.current_entry.load(Ordering::Acquire),
            total_entries: self.total_entries,
            selected_loaded: self.selected_loaded.load(Ordering::Relaxed),
            alternatives_loaded: self.alternatives_loaded.load(Ordering::Relaxed),
            total_alternatives: self.total_alternatives.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}
