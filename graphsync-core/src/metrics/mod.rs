//! Metrics for synchronization sessions
//!
//! Counters and histograms go through the `metrics` facade, so whichever
//! recorder the embedding process installs receives them. Each communicator
//! additionally keeps its own [`SessionStats`].

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

mod collector;

pub use collector::{SessionStats, StatsSnapshot};

pub const MESSAGES_SENT: &str = "graphsync.messages.sent";
pub const MESSAGES_RECEIVED: &str = "graphsync.messages.received";
pub const BYTES_SENT: &str = "graphsync.bytes.sent";
pub const BYTES_RECEIVED: &str = "graphsync.bytes.received";
pub const SYNC_CYCLES: &str = "graphsync.sync.cycles";
pub const SYNC_DURATION_MS: &str = "graphsync.sync.duration_ms";
pub const DELTA_OPERATIONS: &str = "graphsync.delta.operations";
pub const REMOTE_CALLS: &str = "graphsync.remote_calls.total";
pub const REMOTE_CALLS_FAILED: &str = "graphsync.remote_calls.failed";

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(MESSAGES_SENT, "Protocol messages written to the connection");
    describe_counter!(MESSAGES_RECEIVED, "Protocol messages read from the connection");
    describe_counter!(BYTES_SENT, "Framed bytes written to the connection");
    describe_counter!(BYTES_RECEIVED, "Framed bytes read from the connection");
    describe_counter!(SYNC_CYCLES, "Reconciliation rounds completed by the host");
    describe_histogram!(SYNC_DURATION_MS, "Time spent reconciling one round in milliseconds");
    describe_counter!(DELTA_OPERATIONS, "Operations carried by merged deltas");
    describe_counter!(REMOTE_CALLS, "Calls forwarded to the peer");
    describe_counter!(REMOTE_CALLS_FAILED, "Forwarded calls that ended in an exception");
}

pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Records the elapsed time into a histogram when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer, record and return the duration in milliseconds
    pub fn stop(self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.name).record(elapsed);
        elapsed
    }
}
