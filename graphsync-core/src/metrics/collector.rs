//! Per-session counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one communicator, readable while the session runs
#[derive(Debug, Default)]
pub struct SessionStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    sync_cycles: AtomicU64,
    remote_calls: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub sync_cycles: u64,
    pub remote_calls: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        super::record_counter(super::MESSAGES_SENT, 1);
        super::record_counter(super::BYTES_SENT, bytes as u64);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        super::record_counter(super::MESSAGES_RECEIVED, 1);
        super::record_counter(super::BYTES_RECEIVED, bytes as u64);
    }

    pub fn record_sync_cycle(&self, operations: usize) {
        self.sync_cycles.fetch_add(1, Ordering::Relaxed);
        super::record_counter(super::SYNC_CYCLES, 1);
        super::record_counter(super::DELTA_OPERATIONS, operations as u64);
    }

    pub fn record_remote_call(&self, succeeded: bool) {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        super::record_counter(super::REMOTE_CALLS, 1);
        if !succeeded {
            super::record_counter(super::REMOTE_CALLS_FAILED, 1);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            sync_cycles: self.sync_cycles.load(Ordering::Relaxed),
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let stats = SessionStats::new();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received(7);
        stats.record_sync_cycle(3);
        stats.record_remote_call(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.bytes_received, 7);
        assert_eq!(snapshot.sync_cycles, 1);
        assert_eq!(snapshot.remote_calls, 1);
    }
}
