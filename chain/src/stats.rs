//! In-memory counters for light-processing activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped during insertion and diff intake. Read by the node's
/// metrics exporter.
#[derive(Default)]
pub struct ChainStats {
    light_applied: AtomicU64,
    light_fallbacks: AtomicU64,
    full_executed: AtomicU64,
    diffs_accepted: AtomicU64,
    diffs_rejected: AtomicU64,
}

/// Point-in-time copy of [`ChainStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainStatsSnapshot {
    pub light_applied: u64,
    pub light_fallbacks: u64,
    pub full_executed: u64,
    pub diffs_accepted: u64,
    pub diffs_rejected: u64,
}

impl ChainStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A block was committed from its diff.
    pub fn inc_light_applied(&self) {
        self.light_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// A cached diff failed verification and the block was re-executed.
    pub fn inc_light_fallbacks(&self) {
        self.light_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_full_executed(&self) {
        self.full_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_diffs_accepted(&self) {
        self.diffs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_diffs_rejected(&self) {
        self.diffs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChainStatsSnapshot {
        ChainStatsSnapshot {
            light_applied: self.light_applied.load(Ordering::Relaxed),
            light_fallbacks: self.light_fallbacks.load(Ordering::Relaxed),
            full_executed: self.full_executed.load(Ordering::Relaxed),
            diffs_accepted: self.diffs_accepted.load(Ordering::Relaxed),
            diffs_rejected: self.diffs_rejected.load(Ordering::Relaxed),
        }
    }
}
