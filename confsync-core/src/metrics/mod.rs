//! Metrics for the config sync core
//!
//! Counters go through the `metrics` facade so an embedding application
//! can install whichever recorder it likes. [`SyncStats`] keeps a local
//! copy for status reporting.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

mod collector;

pub use collector::{SyncStats, SyncStatsSnapshot};

pub const MERGE_RECEIVED: &str = "config.merge.received";
pub const MERGE_ACCEPTED: &str = "config.merge.accepted";
pub const MERGE_DURATION_MS: &str = "config.merge.duration_ms";
pub const PUSH_GENERATED: &str = "config.push.generated";
pub const PUSH_CONFIRMED: &str = "config.push.confirmed";
pub const DUMP_WRITTEN: &str = "config.dump.written";

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(MERGE_RECEIVED, "Config messages handed to merge");
    describe_counter!(MERGE_ACCEPTED, "Config messages accepted by merge");
    describe_histogram!(MERGE_DURATION_MS, "Duration of one variant merge in milliseconds");
    describe_counter!(PUSH_GENERATED, "Outgoing config pushes generated");
    describe_counter!(PUSH_CONFIRMED, "Config pushes confirmed by the swarm");
    describe_counter!(DUMP_WRITTEN, "Config dumps built for persistence");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        init_metrics();
        record_counter(MERGE_RECEIVED, 3);
        Timer::new(MERGE_DURATION_MS).stop();
    }
}
