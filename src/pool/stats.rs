use crate::udbc::connection::{ConnectionId, ConnectionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One connection held by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub age: Duration,
    /// Time since it was last returned; `None` while checked out.
    pub idle_for: Option<Duration>,
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle and checked out together (including ones being opened).
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
    pub closed: bool,
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub acquisitions: u64,
    pub reused_count: u64,
    pub fresh_count: u64,
    pub exhausted_count: u64,
    pub idle_expired_count: u64,
    pub lifetime_expired_count: u64,
    pub broken_count: u64,
}

impl PoolStats {
    /// Fraction of acquisitions served from the idle set.
    pub fn reuse_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.reused_count as f64 / self.acquisitions as f64
        }
    }
}

/// Relaxed counters updated on the acquire/release paths.
#[derive(Debug, Default)]
pub(crate) struct AtomicPoolStats {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    acquisitions: AtomicU64,
    reused_count: AtomicU64,
    fresh_count: AtomicU64,
    exhausted_count: AtomicU64,
    idle_expired_count: AtomicU64,
    lifetime_expired_count: AtomicU64,
    broken_count: AtomicU64,
}

impl AtomicPoolStats {
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition(&self, reused: bool) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if reused {
            self.reused_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fresh_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_expired(&self) {
        self.idle_expired_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lifetime_expired(&self) {
        self.lifetime_expired_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broken(&self) {
        self.broken_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            reused_count: self.reused_count.load(Ordering::Relaxed),
            fresh_count: self.fresh_count.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            idle_expired_count: self.idle_expired_count.load(Ordering::Relaxed),
            lifetime_expired_count: self.lifetime_expired_count.load(Ordering::Relaxed),
            broken_count: self.broken_count.load(Ordering::Relaxed),
        }
    }
}
