/*
 * Copyright 2025 Joyent, Inc.
 */

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use derive_more::{Display, From, Into};
use slog::{debug, warn, Logger};

use crate::error::Error;
use crate::resource::Resource;

/// Identifier of a pool entry, unique and stable for the entry's lifetime.
/// Ids are assigned sequentially starting from 1 and are never reused while
/// the entry exists.
#[derive(
    Clone, Copy, Debug, Display, Eq, From, Into, Ord, PartialEq, PartialOrd,
)]
pub struct EntryId(u32);

impl EntryId {
    pub(crate) const FIRST: EntryId = EntryId(1);

    pub(crate) fn next(self) -> EntryId {
        EntryId(self.0 + 1)
    }
}

/// Milliseconds since the Unix epoch; the clock used for handle-activity
/// tracking and validation timestamps.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The pieces handed to a caller when an entry is reserved: the resource
/// itself (moved out of the entry), the entry generation the handle must
/// present when it comes back, and the shared activity timestamp.
pub(crate) struct Reservation<R> {
    pub(crate) resource: R,
    pub(crate) generation: u64,
    pub(crate) last_access: Arc<AtomicU64>,
}

/// A pool-internal record pairing one physical resource with its usage
/// bookkeeping. Entries know how to connect, reserve, free, probe, and
/// close themselves, but not how to be selected; that is the ordering
/// policy's job.
///
/// Invariant: an entry that is in use is always connected. An entry can be
/// disconnected while free (after a failed reconnect, retained for
/// statistics) but never while reserved.
pub struct PoolEntry<R> {
    id: EntryId,
    log: Logger,
    resource: Option<R>,
    connected: bool,
    in_use: bool,
    dynamic: bool,
    generation: u64,
    last_access: Arc<AtomicU64>,
    use_count: u64,
    session_use_count: u64,
    connect_count: u32,
    check_count: u32,
    reserved_at: Option<Instant>,
    last_used: Option<Instant>,
    last_checked: Option<Instant>,
    total_use: Duration,
    last_use_time: Duration,
    max_use_time: Duration,
    borrower: Option<String>,
}

impl<R> PoolEntry<R>
where
    R: Resource,
{
    pub(crate) fn new(id: EntryId, resource: R, log: &Logger) -> PoolEntry<R> {
        PoolEntry {
            id,
            log: log.clone(),
            resource: Some(resource),
            connected: false,
            in_use: false,
            dynamic: false,
            generation: 0,
            last_access: Arc::new(AtomicU64::new(0)),
            use_count: 0,
            session_use_count: 0,
            connect_count: 0,
            check_count: 0,
            reserved_at: None,
            last_used: None,
            last_checked: None,
            total_use: Duration::from_millis(0),
            last_use_time: Duration::from_millis(0),
            max_use_time: Duration::from_millis(0),
            borrower: None,
        }
    }

    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    pub(crate) fn in_use(&self) -> bool {
        self.in_use
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub(crate) fn set_dynamic(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) fn session_use_count(&self) -> u64 {
        self.session_use_count
    }

    pub(crate) fn last_used_at(&self) -> Option<Instant> {
        self.last_used
    }

    pub(crate) fn last_access_millis(&self) -> u64 {
        self.last_access.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn borrower_label(&self) -> &str {
        self.borrower.as_deref().unwrap_or("unknown")
    }

    /// Establishes the underlying resource. The held adapter object is
    /// reconnected in place when present; when it was abandoned to a caller
    /// during a forced reclaim, a fresh one is built from the factory.
    pub(crate) fn connect_with<F>(&mut self, create: &F) -> Result<(), Error>
    where
        F: Fn(EntryId) -> R,
    {
        if self.connected {
            return Err(Error::illegal_state(format!(
                "entry {} already connected",
                self.id
            )));
        }

        let mut resource = match self.resource.take() {
            Some(r) => r,
            None => create(self.id),
        };

        match resource.connect() {
            Ok(()) => {
                self.resource = Some(resource);
                self.connected = true;
                self.connect_count += 1;
                self.session_use_count = 0;
                self.last_used = Some(Instant::now());
                self.last_access.store(now_millis(), AtomicOrdering::Relaxed);
                Ok(())
            }
            Err(e) => {
                // Keep the object around for the next attempt; the entry
                // stays disconnected until one succeeds.
                self.resource = Some(resource);
                Err(Error::resource(e))
            }
        }
    }

    /// Reserves this entry, moving the resource out to the caller.
    pub(crate) fn reserve(&mut self, borrower: Option<String>) -> Result<Reservation<R>, Error> {
        if self.in_use {
            return Err(Error::illegal_state(format!(
                "entry {} already in use",
                self.id
            )));
        }
        if !self.connected {
            return Err(Error::illegal_state(format!("entry {} inactive", self.id)));
        }
        let resource = match self.resource.take() {
            Some(r) => r,
            None => {
                return Err(Error::illegal_state(format!(
                    "entry {} has no resource",
                    self.id
                )))
            }
        };

        self.mark_used(borrower);
        Ok(Reservation {
            resource,
            generation: self.generation,
            last_access: Arc::clone(&self.last_access),
        })
    }

    /// Puts the resource back into the entry after the caller returned it.
    /// The entry remains marked in use until `free` runs.
    pub(crate) fn give_back(&mut self, resource: R) {
        self.resource = Some(resource);
    }

    /// Marks the entry as free, accumulating busy time. Freeing an entry
    /// that is already free logs a warning and is a no-op; this defends
    /// against double-release bugs upstream.
    pub(crate) fn free(&mut self) {
        if !self.in_use {
            warn!(self.log, "attempting to re-free entry {}", self.id);
            return;
        }
        self.book_use_time();
        self.in_use = false;
    }

    /// Tears down the underlying resource, swallowing adapter close errors,
    /// and clears the connected/in-use flags regardless of the teardown
    /// outcome. Any outstanding handle is invalidated; a resource currently
    /// abandoned to a caller closes when that handle finally drops.
    pub(crate) fn close(&mut self) {
        if self.in_use {
            self.book_use_time();
            self.in_use = false;
        }
        if let Some(mut resource) = self.resource.take() {
            if let Err(e) = resource.close() {
                debug!(self.log, "error closing entry {} - {}", self.id, e);
            }
        }
        self.connected = false;
        self.generation += 1;
    }

    /// Runs the adapter liveness probe. The entry is marked busy for the
    /// probe's duration and freed afterward, so a probe competes with real
    /// callers in the reservation accounting.
    pub(crate) fn check_resource(&mut self) -> bool {
        self.mark_used(Some(String::from("validator")));
        self.check_count += 1;
        self.last_checked = Some(Instant::now());
        let ok = match self.resource.as_mut() {
            Some(r) => r.check(),
            None => false,
        };
        self.free();
        ok
    }

    /// How long the current reservation has been held, or the duration of
    /// the last one if the entry is free.
    pub(crate) fn current_use_time(&self) -> Duration {
        match (self.in_use, self.reserved_at) {
            (true, Some(start)) => start.elapsed(),
            _ => self.last_use_time,
        }
    }

    /// Age since the entry last started a reservation (or connected).
    pub(crate) fn idle_age(&self, now: Instant) -> Duration {
        match self.last_used {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::from_millis(0),
        }
    }

    pub(crate) fn info(&self) -> EntryInfo {
        let now = Instant::now();
        EntryInfo {
            id: self.id,
            kind: R::KIND,
            dynamic: self.dynamic,
            connected: self.connected,
            in_use: self.in_use,
            use_count: self.use_count,
            session_use_count: self.session_use_count,
            connect_count: self.connect_count,
            check_count: self.check_count,
            total_use: self.total_use,
            current_use: self.current_use_time(),
            max_use: self.max_use_time,
            idle_for: match (self.in_use, self.last_used) {
                (false, Some(at)) => Some(now.saturating_duration_since(at)),
                _ => None,
            },
            since_check: self
                .last_checked
                .map(|at| now.saturating_duration_since(at)),
            borrower: self.borrower.clone(),
        }
    }

    fn mark_used(&mut self, borrower: Option<String>) {
        let now = Instant::now();
        self.reserved_at = Some(now);
        self.last_used = Some(now);
        self.in_use = true;
        self.use_count += 1;
        self.session_use_count += 1;
        self.borrower = borrower;
        self.last_access.store(now_millis(), AtomicOrdering::Relaxed);
    }

    fn book_use_time(&mut self) {
        let use_time = match self.reserved_at {
            Some(start) => start.elapsed(),
            None => Duration::from_millis(0),
        };
        self.last_use_time = use_time;
        self.total_use += use_time;
        self.max_use_time = self.max_use_time.max(use_time);
    }
}

/// A point-in-time snapshot of one entry's bookkeeping, for the
/// administrative statistics surface.
#[derive(Clone, Debug)]
pub struct EntryInfo {
    pub id: EntryId,
    pub kind: &'static str,
    pub dynamic: bool,
    pub connected: bool,
    pub in_use: bool,
    pub use_count: u64,
    pub session_use_count: u64,
    pub connect_count: u32,
    pub check_count: u32,
    pub total_use: Duration,
    pub current_use: Duration,
    pub max_use: Duration,
    pub idle_for: Option<Duration>,
    pub since_check: Option<Duration>,
    pub borrower: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    struct TestResource {
        connected: bool,
        fail_connect: bool,
        healthy: bool,
    }

    impl TestResource {
        fn new() -> TestResource {
            TestResource {
                connected: false,
                fail_connect: false,
                healthy: true,
            }
        }
    }

    impl Resource for TestResource {
        type Error = io::Error;
        const KIND: &'static str = "Test";
        const STALE_AFTER: Duration = Duration::from_secs(5);

        fn connect(&mut self) -> Result<(), io::Error> {
            if self.fail_connect {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"));
            }
            self.connected = true;
            Ok(())
        }

        fn close(&mut self) -> Result<(), io::Error> {
            self.connected = false;
            Ok(())
        }

        fn check(&mut self) -> bool {
            self.healthy
        }

        fn cleanup(&mut self) -> Result<(), io::Error> {
            Ok(())
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn create(_id: EntryId) -> TestResource {
        TestResource::new()
    }

    #[test]
    fn reserve_requires_connected_and_free() {
        let log = test_logger();
        let mut entry = PoolEntry::new(EntryId::FIRST, TestResource::new(), &log);

        // Not yet connected.
        assert!(entry.reserve(None).is_err());

        entry.connect_with(&create).unwrap();
        let res = entry.reserve(None).unwrap();

        // Double reserve is a contract violation.
        assert!(entry.reserve(None).is_err());

        entry.give_back(res.resource);
        entry.free();
        assert!(!entry.in_use());
    }

    #[test]
    fn double_free_is_a_noop() {
        let log = test_logger();
        let mut entry = PoolEntry::new(EntryId::FIRST, TestResource::new(), &log);
        entry.connect_with(&create).unwrap();

        let res = entry.reserve(None).unwrap();
        entry.give_back(res.resource);
        entry.free();

        let total = entry.total_use;
        let count = entry.use_count();
        entry.free();
        assert_eq!(entry.total_use, total);
        assert_eq!(entry.use_count(), count);
        assert!(!entry.in_use());
    }

    #[test]
    fn reconnect_resets_session_count_only() {
        let log = test_logger();
        let mut entry = PoolEntry::new(EntryId::FIRST, TestResource::new(), &log);
        entry.connect_with(&create).unwrap();

        for _ in 0..3 {
            let res = entry.reserve(None).unwrap();
            entry.give_back(res.resource);
            entry.free();
        }
        assert_eq!(entry.use_count(), 3);
        assert_eq!(entry.session_use_count(), 3);

        entry.close();
        entry.connect_with(&create).unwrap();
        assert_eq!(entry.session_use_count(), 0);
        assert_eq!(entry.use_count(), 3);
        assert_eq!(entry.connect_count, 2);
    }

    #[test]
    fn close_invalidates_outstanding_reservations() {
        let log = test_logger();
        let mut entry = PoolEntry::new(EntryId::FIRST, TestResource::new(), &log);
        entry.connect_with(&create).unwrap();

        let res = entry.reserve(None).unwrap();
        let generation = res.generation;
        entry.close();
        assert!(!entry.in_use());
        assert!(!entry.is_connected());
        assert_ne!(entry.generation(), generation);

        // The abandoned resource can be rebuilt from the factory.
        entry.connect_with(&create).unwrap();
        assert!(entry.is_connected());
    }

    #[test]
    fn failed_connect_leaves_entry_inactive() {
        let log = test_logger();
        let mut resource = TestResource::new();
        resource.fail_connect = true;
        let mut entry = PoolEntry::new(EntryId::FIRST, resource, &log);

        assert!(entry.connect_with(&create).is_err());
        assert!(!entry.is_connected());
        assert!(!entry.in_use());
        assert_eq!(entry.connect_count, 0);
    }

    #[test]
    fn probe_counts_as_a_reservation() {
        let log = test_logger();
        let mut entry = PoolEntry::new(EntryId::FIRST, TestResource::new(), &log);
        entry.connect_with(&create).unwrap();

        assert!(entry.check_resource());
        assert_eq!(entry.use_count(), 1);
        assert_eq!(entry.check_count, 1);
        assert!(!entry.in_use());
        assert!(entry.info().since_check.is_some());
    }
}
