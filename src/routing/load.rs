//! Per-replica load accounting.
//!
//! Every replica owns one [`LoadCounters`] cell. The cell is shared between
//! successive versions of the replica object and every index snapshot that
//! references it, so updates from the watcher never reset live load.
//! [`LoadTracker`] is the only writer; scorers only read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::store::Replica;

/// Which counter a request occupies on its replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSlot {
    Running,
    Waiting,
}

/// Point-in-time copy of a replica's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSnapshot {
    pub running: u64,
    pub waiting: u64,
}

/// Live counters for one replica.
#[derive(Debug, Default)]
pub struct LoadCounters {
    running: AtomicU64,
    waiting: AtomicU64,
}

impl LoadCounters {
    pub fn running(&self) -> u64 {
        self.running.load(Ordering::Acquire)
    }

    pub fn waiting(&self) -> u64 {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            running: self.running(),
            waiting: self.waiting(),
        }
    }

    fn cell(&self, slot: LoadSlot) -> &AtomicU64 {
        match slot {
            LoadSlot::Running => &self.running,
            LoadSlot::Waiting => &self.waiting,
        }
    }

    fn increment(&self, slot: LoadSlot) {
        self.cell(slot).fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements without going below zero. Returns `false` when the
    /// counter was already zero.
    fn decrement(&self, slot: LoadSlot) -> bool {
        self.cell(slot)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .is_ok()
    }
}

/// Counters describing the accounting itself.
#[derive(Debug, Default)]
pub struct LoadStats {
    pub started: AtomicU64,
    pub finished: AtomicU64,
    pub underflows: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStatsSnapshot {
    pub started: u64,
    pub finished: u64,
    pub underflows: u64,
}

/// Mutates replica load counters on request start and end.
///
/// Safe under arbitrary concurrent use for the same replica. A decrement
/// of a zero counter is clamped, logged and counted in
/// [`LoadStats::underflows`] instead of producing negative load.
#[derive(Debug, Default)]
pub struct LoadTracker {
    stats: LoadStats,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an admitted request. `queued` places it in the waiting
    /// counter instead of the running one.
    pub fn on_request_start(&self, replica: &Replica, queued: bool) {
        replica.load().increment(slot_for(queued));
        self.stats.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases the counter taken by [`on_request_start`](Self::on_request_start).
    pub fn on_request_end(&self, replica: &Replica, queued: bool) {
        self.release(replica, slot_for(queued));
        self.stats.finished.fetch_add(1, Ordering::Relaxed);
    }

    /// Moves a queued request into the running counter.
    pub fn promote(&self, replica: &Replica) {
        replica.load().increment(LoadSlot::Running);
        self.release(replica, LoadSlot::Waiting);
    }

    /// Admits a request and returns a token that walks it through
    /// `Waiting -> Running -> Completed`.
    ///
    /// The token releases its counter exactly once, either through
    /// [`InflightRequest::finish`] or on drop.
    pub fn admit(self: &Arc<Self>, replica: Arc<Replica>, queued: bool) -> InflightRequest {
        self.on_request_start(&replica, queued);
        InflightRequest {
            tracker: Arc::clone(self),
            replica,
            slot: slot_for(queued),
            completed: false,
        }
    }

    pub fn stats(&self) -> LoadStatsSnapshot {
        LoadStatsSnapshot {
            started: self.stats.started.load(Ordering::Relaxed),
            finished: self.stats.finished.load(Ordering::Relaxed),
            underflows: self.stats.underflows.load(Ordering::Relaxed),
        }
    }

    /// Number of clamped decrements since startup.
    pub fn underflows(&self) -> u64 {
        self.stats.underflows.load(Ordering::Relaxed)
    }

    fn release(&self, replica: &Replica, slot: LoadSlot) {
        if !replica.load().decrement(slot) {
            self.stats.underflows.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                replica = %replica.key(),
                ?slot,
                "load counter underflow, clamped to zero"
            );
        }
    }
}

fn slot_for(queued: bool) -> LoadSlot {
    if queued {
        LoadSlot::Waiting
    } else {
        LoadSlot::Running
    }
}

/// One admitted request bound to its replica.
#[derive(Debug)]
pub struct InflightRequest {
    tracker: Arc<LoadTracker>,
    replica: Arc<Replica>,
    slot: LoadSlot,
    completed: bool,
}

impl InflightRequest {
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Counter currently held by this request.
    pub fn slot(&self) -> LoadSlot {
        self.slot
    }

    /// `Waiting -> Running`. No-op for a request that is already running.
    pub fn start_running(&mut self) {
        if self.slot == LoadSlot::Waiting {
            self.tracker.promote(&self.replica);
            self.slot = LoadSlot::Running;
        }
    }

    /// `-> Completed`.
    pub fn finish(mut self) {
        self.complete();
    }

    fn complete(&mut self) {
        if !self.completed {
            self.completed = true;
            self.tracker
                .on_request_end(&self.replica, self.slot == LoadSlot::Waiting);
        }
    }
}

impl Drop for InflightRequest {
    fn drop(&mut self) {
        self.complete();
    }
}
