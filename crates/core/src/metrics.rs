use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::TerminalStatus;

/// Lock-free lifetime counters for a pool.
#[derive(Default)]
pub struct PoolStats {
    spawned: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    killed: AtomicU64,
    purged: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_spawned(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_killed(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_purged(&self, count: u64) {
        self.purged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_finished(&self, status: TerminalStatus) {
        let counter = match status {
            TerminalStatus::Completed => &self.completed,
            TerminalStatus::Failed => &self.failed,
            TerminalStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            spawned: self.spawned.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsSnapshot {
    pub spawned: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub killed: u64,
    pub purged: u64,
}

impl PoolStatsSnapshot {
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Share of finished sessions that completed; 1.0 when none finished yet.
    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            return 1.0;
        }
        self.completed as f64 / finished as f64
    }
}
