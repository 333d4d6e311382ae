//! Process-local sync counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals kept alongside the exported metrics
#[derive(Debug, Default)]
pub struct SyncStats {
    merge_received: AtomicU64,
    merge_accepted: AtomicU64,
    push_generated: AtomicU64,
    push_confirmed: AtomicU64,
    dump_written: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    pub merge_received: u64,
    pub merge_accepted: u64,
    pub push_generated: u64,
    pub push_confirmed: u64,
    pub dump_written: u64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_merge(&self, received: usize, accepted: usize) {
        self.merge_received.fetch_add(received as u64, Ordering::Relaxed);
        self.merge_accepted.fetch_add(accepted as u64, Ordering::Relaxed);
        super::record_counter(super::MERGE_RECEIVED, received as u64);
        super::record_counter(super::MERGE_ACCEPTED, accepted as u64);
    }

    pub fn record_push_generated(&self) {
        self.push_generated.fetch_add(1, Ordering::Relaxed);
        super::record_counter(super::PUSH_GENERATED, 1);
    }

    pub fn record_push_confirmed(&self) {
        self.push_confirmed.fetch_add(1, Ordering::Relaxed);
        super::record_counter(super::PUSH_CONFIRMED, 1);
    }

    pub fn record_dump(&self) {
        self.dump_written.fetch_add(1, Ordering::Relaxed);
        super::record_counter(super::DUMP_WRITTEN, 1);
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            merge_received: self.merge_received.load(Ordering::Relaxed),
            merge_accepted: self.merge_accepted.load(Ordering::Relaxed),
            push_generated: self.push_generated.load(Ordering::Relaxed),
            push_confirmed: self.push_confirmed.load(Ordering::Relaxed),
            dump_written: self.dump_written.load(Ordering::Relaxed),
        }
    }
}
