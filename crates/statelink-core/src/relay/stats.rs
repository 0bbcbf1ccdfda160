use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Relay counters, updated lock-free from the relay threads.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    relayed: AtomicU64,
    applied: AtomicU64,
    dropped: AtomicU64,
    recv_errors: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayStatsSnapshot {
    pub received: u64,
    pub relayed: u64,
    pub applied: u64,
    pub dropped: u64,
    pub recv_errors: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self, count: usize) {
        self.relayed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
