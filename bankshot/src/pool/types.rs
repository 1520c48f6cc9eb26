/*
 * Copyright 2025 Joyent, Inc.
 */

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use slog::Logger;

use crate::entry::now_millis;

/// Construction-time configuration for a resource pool.
#[derive(Debug)]
pub struct PoolOptions {
    /// Pool name, used in every log line.
    pub name: String,
    /// Hard cap on the number of entries; the pool never grows past this.
    pub max_size: u32,
    /// How often the background monitor validates the pool.
    pub monitor_interval: Duration,
    /// How long a claim waits for an idle entry before considering
    /// expansion.
    pub borrow_wait: Duration,
    /// How long a claim waits once the pool is at capacity before failing
    /// with a pool-full error.
    pub full_wait: Duration,
    /// Maximum reservations per connect before a persistent entry is
    /// forcibly restarted; 0 disables the threshold.
    pub max_requests: u64,
    /// Overrides the resource kind's staleness budget when set.
    pub stale_after: Option<Duration>,
    /// Record a borrower tag on every reservation (the caller-supplied tag,
    /// or the reserving thread's name) for diagnostic dumps. Off by
    /// default; tags show up in forced-reclaim and pool-full logging.
    pub log_borrowers: bool,
    pub log: Logger,
}

impl PoolOptions {
    /// Options with the stock wait times (5ms borrow wait, 250ms full wait)
    /// and a 30 second monitor interval.
    pub fn new<S: Into<String>>(name: S, max_size: u32, log: Logger) -> PoolOptions {
        PoolOptions {
            name: name.into(),
            max_size,
            monitor_interval: Duration::from_secs(30),
            borrow_wait: Duration::from_millis(5),
            full_wait: Duration::from_millis(250),
            max_requests: 0,
            stale_after: None,
            log_borrowers: false,
            log,
        }
    }
}

/// Aggregate pool statistics for the administrative surface.
#[derive(Clone, Copy, Debug)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub max_size: u32,
    pub total_requests: u64,
    pub full_count: u64,
    pub expand_count: u64,
    pub wait_count: u64,
    pub error_count: u64,
    pub max_wait: Duration,
    pub max_borrow: Duration,
    pub validations: u64,
    /// Age of the last completed validation pass, if any has run.
    pub last_validation: Option<Duration>,
}

/// Lock-free aggregate counters. Everything here is advisory bookkeeping
/// read outside the pool mutex.
pub(crate) struct PoolCounters {
    pub(crate) total_requests: AtomicU64,
    pub(crate) full_count: AtomicU64,
    pub(crate) expand_count: AtomicU64,
    pub(crate) wait_count: AtomicU64,
    pub(crate) error_count: AtomicU64,
    pub(crate) max_wait_ms: AtomicU64,
    pub(crate) max_borrow_ms: AtomicU64,
    pub(crate) validations: AtomicU64,
    pub(crate) last_validation_ms: AtomicU64,
    pub(crate) last_full_ms: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn new() -> PoolCounters {
        PoolCounters {
            total_requests: AtomicU64::new(0),
            full_count: AtomicU64::new(0),
            expand_count: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            max_wait_ms: AtomicU64::new(0),
            max_borrow_ms: AtomicU64::new(0),
            validations: AtomicU64::new(0),
            last_validation_ms: AtomicU64::new(0),
            last_full_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn count_error(&self) {
        self.error_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_wait(&self, waited: Duration) {
        self.max_wait_ms
            .fetch_max(waited.as_millis() as u64, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_borrow(&self, borrowed: Duration) {
        self.max_borrow_ms
            .fetch_max(borrowed.as_millis() as u64, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_validation(&self) {
        self.validations.fetch_add(1, AtomicOrdering::Relaxed);
        self.last_validation_ms
            .store(now_millis(), AtomicOrdering::Relaxed);
    }

    pub(crate) fn reset_max_times(&self) {
        self.max_wait_ms.store(0, AtomicOrdering::Relaxed);
        self.max_borrow_ms.store(0, AtomicOrdering::Relaxed);
    }

    pub(crate) fn last_validation_age(&self) -> Option<Duration> {
        match self.last_validation_ms.load(AtomicOrdering::Relaxed) {
            0 => None,
            at => Some(Duration::from_millis(now_millis().saturating_sub(at))),
        }
    }
}
