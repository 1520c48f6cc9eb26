/*
 * Copyright 2025 Joyent, Inc.
 */

pub mod types;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use slog::{debug, error, info, warn, Logger};

use crate::entry::{now_millis, EntryId, EntryInfo, PoolEntry};
use crate::error::Error;
use crate::monitor::{monitor_loop, MonitorSignal};
use crate::order;
use crate::pool::types::{PoolCounters, PoolOptions, PoolStats};
use crate::resource::Resource;

/// Rate limit on the pool-full diagnostic dump, so sustained overload does
/// not turn into a log storm.
const FULL_DUMP_INTERVAL_MS: u64 = 5_000;

/// A reservation held this much longer than its last observed activity gets
/// a long-reserved-but-idle warning during validation.
const RESERVED_IDLE_SKEW: Duration = Duration::from_secs(15);

/// How long the shutdown drain waits for a busy entry to come home before
/// severing it anyway.
const DRAIN_WAIT: Duration = Duration::from_millis(50);

/// The pool's shared mutable state: every entry ever created (inactive ones
/// are retained for statistics), plus the idle subset available for
/// immediate handoff.
struct PoolData<R> {
    entries: BTreeMap<EntryId, PoolEntry<R>>,
    idle: Vec<EntryId>,
}

impl<R> PoolData<R>
where
    R: Resource,
{
    fn new() -> PoolData<R> {
        PoolData {
            entries: BTreeMap::new(),
            idle: Vec::new(),
        }
    }

    fn next_id(&self) -> EntryId {
        self.entries
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(EntryId::FIRST)
    }
}

/// State shared between pool clones, outstanding handles, and the monitor
/// thread. Set-membership mutations happen under the `data` mutex;
/// aggregate counters are lock-free.
pub(crate) struct PoolShared<R, F> {
    pub(crate) name: String,
    pub(crate) log: Logger,
    pub(crate) monitor_interval: Duration,
    pub(crate) monitor: MonitorSignal,
    max_size: u32,
    max_requests: u64,
    borrow_wait: Duration,
    full_wait: Duration,
    stale_after: Duration,
    log_borrowers: bool,
    create: F,
    data: Mutex<PoolData<R>>,
    available: Condvar,
    counters: PoolCounters,
    closed: AtomicBool,
}

/// A pool of scarce, expensive-to-create resources under a hard size cap.
///
/// The pool hands out [`PoolHandle`]s; dropping a handle returns the
/// resource to the pool rather than destroying it. A background monitor
/// thread periodically validates every entry, reclaims stale reservations,
/// and reconnects entries whose liveness probe fails.
///
/// Clones share the same underlying pool. Only the original instance may
/// [`close`](ResourcePool::close) it.
pub struct ResourcePool<R, F> {
    shared: Arc<PoolShared<R, F>>,
    monitor_thread: Option<thread::JoinHandle<()>>,
}

impl<R, F> Clone for ResourcePool<R, F> {
    fn clone(&self) -> ResourcePool<R, F> {
        ResourcePool {
            shared: Arc::clone(&self.shared),
            monitor_thread: None,
        }
    }
}

impl<R, F> ResourcePool<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    /// Creates the pool and spawns its monitor thread. The pool starts
    /// empty; call [`connect`](ResourcePool::connect) to seed it.
    ///
    /// `create` builds one unconnected resource for the given entry id;
    /// adapter configuration lives in the closure's captures.
    pub fn new(options: PoolOptions, create: F) -> ResourcePool<R, F> {
        let shared = Arc::new(PoolShared {
            name: options.name,
            log: options.log,
            monitor_interval: options.monitor_interval,
            monitor: MonitorSignal::new(),
            max_size: options.max_size,
            max_requests: options.max_requests,
            borrow_wait: options.borrow_wait,
            full_wait: options.full_wait,
            stale_after: options.stale_after.unwrap_or(R::STALE_AFTER),
            log_borrowers: options.log_borrowers,
            create,
            data: Mutex::new(PoolData::new()),
            available: Condvar::new(),
            counters: PoolCounters::new(),
            closed: AtomicBool::new(false),
        });

        let monitor_shared = Arc::clone(&shared);
        let monitor_thread = thread::spawn(move || monitor_loop(monitor_shared));

        ResourcePool {
            shared,
            monitor_thread: Some(monitor_thread),
        }
    }

    /// Seeds `initial_size` persistent entries. Fails with a configuration
    /// error when the seed size exceeds the pool cap, and with the
    /// adapter's connect error when establishing any seed fails.
    pub fn connect(&self, initial_size: u32) -> Result<(), Error> {
        let shared = &self.shared;
        if initial_size > shared.max_size {
            return Err(Error::Configuration(format!(
                "invalid seed size {} for pool of {}",
                initial_size, shared.max_size
            )));
        }

        info!(
            shared.log,
            "opening {} (seed={}, max={})", shared.name, initial_size, shared.max_size
        );
        shared.counters.reset_max_times();

        let mut data = shared.data.lock().unwrap();
        for _ in 0..initial_size {
            let id = data.next_id();
            let mut entry = PoolEntry::new(id, (shared.create)(id), &shared.log);
            entry.connect_with(&shared.create)?;
            data.entries.insert(id, entry);
            data.idle.push(id);
        }
        Ok(())
    }

    /// Gets a resource from the pool, growing it when every entry is busy
    /// and the cap has not been reached. Blocks at most once, for a bounded
    /// interval, before failing with [`Error::PoolFull`]; callers apply
    /// their own retry policy on top.
    pub fn claim(&self) -> Result<PoolHandle<R, F>, Error> {
        self.claim_inner(None)
    }

    /// Like [`claim`](ResourcePool::claim), recording `tag` as the borrower
    /// for diagnostic dumps when borrower logging is enabled.
    pub fn claim_tagged(&self, tag: &str) -> Result<PoolHandle<R, F>, Error> {
        self.claim_inner(Some(String::from(tag)))
    }

    /// Opportunistic claim: takes an idle entry if one is available right
    /// now, without waiting or growing the pool.
    pub fn try_claim(&self) -> Option<PoolHandle<R, F>> {
        if self.shared.is_closed() {
            return None;
        }
        let mut data = self.shared.data.lock().unwrap();
        let id = pop_best_idle(&mut data)?;
        let entry = data.entries.get_mut(&id)?;
        if entry.is_connected() && !entry.in_use() {
            self.reserve_entry(entry, None).ok()
        } else {
            warn!(
                self.shared.log,
                "{} pulled unusable idle entry {} (connected={}, in_use={})",
                self.shared.name,
                id,
                entry.is_connected(),
                entry.in_use()
            );
            self.shared.counters.count_error();
            None
        }
    }

    fn claim_inner(&self, tag: Option<String>) -> Result<PoolHandle<R, F>, Error> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(Error::illegal_state("pool is closed"));
        }

        let wait_start = Instant::now();
        let mut data = shared.data.lock().unwrap();

        // Opportunistic phase: wait briefly for an idle entry before
        // considering expansion.
        if data.idle.is_empty() {
            data = shared.wait_for_idle(data, shared.borrow_wait);
        }
        if let Some(id) = pop_best_idle(&mut data) {
            let entry = data
                .entries
                .get_mut(&id)
                .expect("idle entry missing from the entry table");
            if entry.is_connected() && !entry.in_use() {
                let handle = self.reserve_entry(entry, tag)?;
                let waited_ms = wait_start.elapsed().as_millis() as u64;
                if waited_ms > 5 {
                    info!(
                        shared.log,
                        "{} reserve {} [{}] ({}ms)",
                        shared.name,
                        id,
                        handle.use_count,
                        waited_ms
                    );
                } else {
                    debug!(
                        shared.log,
                        "{} reserve {} [{}]", shared.name, id, handle.use_count
                    );
                }
                return Ok(handle);
            }
            warn!(
                shared.log,
                "{} pulled unusable idle entry {} (connected={}, in_use={})",
                shared.name,
                id,
                entry.is_connected(),
                entry.in_use()
            );
            shared.counters.count_error();
        }

        // Reuse a registered-but-unreserved entry, reconnecting it if it
        // went inactive; failing that, grow below the cap with a dynamic
        // entry. Reuse beats creation beats waiting.
        let unreserved = data
            .entries
            .iter()
            .find(|(_, e)| !e.in_use())
            .map(|(id, _)| *id);
        match unreserved {
            Some(id) => {
                if let Some(pos) = data.idle.iter().position(|i| *i == id) {
                    data.idle.remove(pos);
                }
                let entry = data.entries.get_mut(&id).unwrap();
                if !entry.is_connected() {
                    info!(shared.log, "{} reconnecting entry {}", shared.name, id);
                    entry.connect_with(&shared.create)?;
                    shared
                        .counters
                        .expand_count
                        .fetch_add(1, AtomicOrdering::Relaxed);
                }
                let handle = self.reserve_entry(entry, tag)?;
                debug!(
                    shared.log,
                    "{} reserve(revive) {} [{}]", shared.name, id, handle.use_count
                );
                return Ok(handle);
            }
            None if (data.entries.len() as u32) < shared.max_size => {
                let id = data.next_id();
                let mut entry = PoolEntry::new(id, (shared.create)(id), &shared.log);
                entry.set_dynamic(true);
                entry.connect_with(&shared.create)?;
                data.entries.insert(id, entry);
                shared
                    .counters
                    .expand_count
                    .fetch_add(1, AtomicOrdering::Relaxed);
                let entry = data.entries.get_mut(&id).unwrap();
                let handle = self.reserve_entry(entry, tag)?;
                debug!(
                    shared.log,
                    "{} reserve(expand) {} [{}]", shared.name, id, handle.use_count
                );
                return Ok(handle);
            }
            None => (),
        }

        // At capacity with every entry reserved: one bounded wait for a
        // release, then give up. No spinning.
        let full_wait_start = Instant::now();
        data = shared.wait_for_idle(data, shared.full_wait);
        let waited = full_wait_start.elapsed();
        shared.counters.record_wait(waited);
        if let Some(id) = pop_best_idle(&mut data) {
            let entry = data
                .entries
                .get_mut(&id)
                .expect("idle entry missing from the entry table");
            if entry.is_connected() && !entry.in_use() {
                shared
                    .counters
                    .wait_count
                    .fetch_add(1, AtomicOrdering::Relaxed);
                let handle = self.reserve_entry(entry, tag)?;
                let waited_ms = waited.as_millis() as u64;
                if waited_ms > 25 {
                    warn!(
                        shared.log,
                        "{} waited {}ms for entry {}", shared.name, waited_ms, id
                    );
                } else {
                    debug!(
                        shared.log,
                        "{} reserve(wait) {} [{}] ({}ms)",
                        shared.name,
                        id,
                        handle.use_count,
                        waited_ms
                    );
                }
                return Ok(handle);
            }
            warn!(
                shared.log,
                "{} pulled unusable idle entry {} (connected={}, in_use={})",
                shared.name,
                id,
                entry.is_connected(),
                entry.in_use()
            );
            shared.counters.count_error();
        }

        shared.dump_entries(&data);
        shared
            .counters
            .full_count
            .fetch_add(1, AtomicOrdering::Relaxed);
        Err(Error::PoolFull)
    }

    fn reserve_entry(
        &self,
        entry: &mut PoolEntry<R>,
        tag: Option<String>,
    ) -> Result<PoolHandle<R, F>, Error> {
        let shared = &self.shared;
        let borrower = if shared.log_borrowers {
            tag.or_else(|| thread::current().name().map(String::from))
        } else {
            tag
        };
        let reservation = entry.reserve(borrower)?;
        shared
            .counters
            .total_requests
            .fetch_add(1, AtomicOrdering::Relaxed);
        Ok(PoolHandle {
            pool: self.clone(),
            id: entry.id(),
            generation: reservation.generation,
            use_count: entry.use_count(),
            last_access: reservation.last_access,
            resource: Some(reservation.resource),
        })
    }

    /// Returns a resource to the pool, reporting how long it was borrowed.
    /// Dropping the handle does the same; this form exists for callers that
    /// want the elapsed time.
    pub fn release(&self, mut handle: PoolHandle<R, F>) -> Duration {
        match handle.resource.take() {
            Some(resource) => self.release_parts(handle.id, handle.generation, resource),
            None => Duration::from_millis(0),
        }
    }

    fn release_parts(&self, id: EntryId, generation: u64, mut resource: R) -> Duration {
        let shared = &self.shared;
        let mut data = shared.data.lock().unwrap();

        let unrecognized = match data.entries.get(&id) {
            None => {
                warn!(shared.log, "{} release of unknown entry {}", shared.name, id);
                true
            }
            Some(entry) if entry.generation() != generation || !entry.in_use() => {
                // The monitor reclaimed this reservation out from under the
                // caller; the slot has moved on, so the returned resource
                // is discarded.
                warn!(
                    shared.log,
                    "{} discarding stale handle for entry {}", shared.name, id
                );
                true
            }
            Some(_) => false,
        };
        if unrecognized {
            shared.counters.count_error();
            drop(data);
            let _ = resource.close();
            return Duration::from_millis(0);
        }

        if let Err(e) = resource.cleanup() {
            warn!(
                shared.log,
                "{} error cleaning up entry {} - {}", shared.name, id, e
            );
            shared.counters.count_error();
            shared.monitor.poke();
        }

        let (use_time, back_to_idle) = {
            let entry = data.entries.get_mut(&id).unwrap();
            debug!(
                shared.log,
                "{} release {} [{}]",
                shared.name,
                id,
                entry.use_count()
            );
            entry.give_back(resource);
            let use_time = entry.current_use_time();
            shared.counters.record_borrow(use_time);

            let stale = use_time > shared.stale_after;
            if entry.is_dynamic() && stale {
                error!(
                    shared.log,
                    "{} closed stale dynamic entry {} after {}ms (borrower: {})",
                    shared.name,
                    id,
                    use_time.as_millis(),
                    entry.borrower_label()
                );
                entry.close();
                shared.counters.count_error();
                return use_time;
            }

            if !entry.is_dynamic() {
                let worn_out = shared.max_requests > 0
                    && entry.session_use_count() > shared.max_requests;
                if stale || worn_out {
                    info!(
                        shared.log,
                        "{} restarting entry {} after {}/{} reservations",
                        shared.name,
                        id,
                        entry.session_use_count(),
                        entry.use_count()
                    );
                    entry.close();
                    if let Err(e) = entry.connect_with(&shared.create) {
                        error!(
                            shared.log,
                            "{} cannot reconnect entry {} - {}", shared.name, id, e
                        );
                        shared.counters.count_error();
                    }
                }
            }

            (use_time, entry.is_connected())
        };

        if back_to_idle {
            shared.add_idle_locked(&mut data, id);
        }
        debug!(
            shared.log,
            "{} released {} [{}ms]",
            shared.name,
            id,
            use_time.as_millis()
        );
        use_time
    }

    /// Runs one synchronous validation pass, the same work the monitor
    /// thread performs on its interval.
    pub fn validate(&self) {
        self.shared.validate();
    }

    /// Stops the monitor and drains every entry, waiting briefly for in-use
    /// entries to finish rather than forcibly severing them. Only the
    /// original pool instance may close the pool; clones get an error.
    pub fn close(&mut self) -> Result<(), Error> {
        let monitor_thread = match self.monitor_thread.take() {
            Some(handle) => handle,
            None => {
                return Err(Error::illegal_state(
                    "pool clones may not close the pool",
                ))
            }
        };

        let shared = &self.shared;
        info!(shared.log, "shutting down pool {}", shared.name);
        shared.closed.store(true, AtomicOrdering::Relaxed);
        shared.monitor.poke();
        let _ = monitor_thread.join();

        let mut data = shared.data.lock().unwrap();
        data.idle.clear();
        let ids: Vec<EntryId> = data.entries.keys().copied().collect();
        for id in ids {
            if data.entries.get(&id).map(|e| e.in_use()).unwrap_or(false) {
                warn!(shared.log, "{} entry {} in use, waiting", shared.name, id);
                drop(data);
                thread::sleep(DRAIN_WAIT);
                data = shared.data.lock().unwrap();
            }
            if let Some(mut entry) = data.entries.remove(&id) {
                if entry.in_use() {
                    warn!(shared.log, "{} closing busy entry {}", shared.name, id);
                } else {
                    info!(shared.log, "{} closing entry {}", shared.name, id);
                }
                entry.close();
            }
        }
        // Releases that raced the drain may have re-added ids for entries
        // that are now gone.
        data.idle.clear();
        drop(data);
        info!(shared.log, "shut down {}", shared.name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Aggregate pool statistics for the administrative surface.
    pub fn stats(&self) -> PoolStats {
        let data = self.shared.data.lock().unwrap();
        let c = &self.shared.counters;
        PoolStats {
            size: data.entries.len() as u32,
            idle: data.idle.len() as u32,
            max_size: self.shared.max_size,
            total_requests: c.total_requests.load(AtomicOrdering::Relaxed),
            full_count: c.full_count.load(AtomicOrdering::Relaxed),
            expand_count: c.expand_count.load(AtomicOrdering::Relaxed),
            wait_count: c.wait_count.load(AtomicOrdering::Relaxed),
            error_count: c.error_count.load(AtomicOrdering::Relaxed),
            max_wait: Duration::from_millis(c.max_wait_ms.load(AtomicOrdering::Relaxed)),
            max_borrow: Duration::from_millis(
                c.max_borrow_ms.load(AtomicOrdering::Relaxed),
            ),
            validations: c.validations.load(AtomicOrdering::Relaxed),
            last_validation: c.last_validation_age(),
        }
    }

    /// Per-entry snapshots for the administrative surface.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let data = self.shared.data.lock().unwrap();
        data.entries.values().map(|e| e.info()).collect()
    }

    /// Resets the running max wait and max borrow times.
    pub fn reset_max_times(&self) {
        self.shared.counters.reset_max_times();
    }
}

impl<R, F> PoolShared<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::Relaxed)
    }

    fn wait_for_idle<'a>(
        &self,
        mut guard: MutexGuard<'a, PoolData<R>>,
        timeout: Duration,
    ) -> MutexGuard<'a, PoolData<R>> {
        let deadline = Instant::now() + timeout;
        while guard.idle.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (g, _) = self.available.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
        guard
    }

    /// Frees the entry if needed and puts it back in the idle set, warning
    /// on a double insert instead of corrupting the set.
    fn add_idle_locked(&self, data: &mut PoolData<R>, id: EntryId) {
        if let Some(entry) = data.entries.get_mut(&id) {
            if entry.in_use() {
                entry.free();
            }
        }
        if data.idle.contains(&id) {
            warn!(
                self.log,
                "{} entry {} already in the idle set - {:?}", self.name, id, data.idle
            );
        } else {
            data.idle.push(id);
            self.available.notify_one();
        }
    }

    /// One validation pass over the whole pool. Runs under the pool mutex,
    /// like every other set-membership mutation; a failure on one entry
    /// never aborts the loop over the others.
    pub(crate) fn validate(&self) {
        debug!(self.log, "{} {} validator started", self.name, R::KIND);
        self.counters.record_validation();
        let mut data = self.data.lock().unwrap();

        // The idle set must mirror the connected-and-free entries. Drift
        // happens under concurrent handoff races; it is logged, not fatal.
        let free: Vec<EntryId> = data
            .entries
            .values()
            .filter(|e| e.is_connected() && !e.in_use())
            .map(|e| e.id())
            .collect();
        let idle_connected = data
            .idle
            .iter()
            .filter(|id| {
                data.entries
                    .get(*id)
                    .map(|e| e.is_connected())
                    .unwrap_or(false)
            })
            .count();
        if free.len() != data.idle.len() || idle_connected != data.idle.len() {
            warn!(
                self.log,
                "{} free = {} {:?}, idle = {} {:?} ({} connected)",
                self.name,
                free.len(),
                free,
                data.idle.len(),
                data.idle,
                idle_connected
            );
        }

        let now = Instant::now();
        let ids: Vec<EntryId> = data.entries.keys().copied().collect();
        for id in ids {
            let (in_use, connected, dynamic, stale, idle_age) = {
                let entry = match data.entries.get(&id) {
                    Some(e) => e,
                    None => continue,
                };
                let use_time = entry.current_use_time();
                let mut stale = entry.in_use() && use_time > self.stale_after;
                if stale {
                    // A long reservation whose handle saw recent activity is
                    // a slow caller, not a stuck one.
                    let last_activity = Duration::from_millis(
                        now_millis().saturating_sub(entry.last_access_millis()),
                    );
                    if use_time > last_activity + RESERVED_IDLE_SKEW {
                        warn!(
                            self.log,
                            "{} entry {} reserved for {}ms, last activity {}ms ago",
                            self.name,
                            id,
                            use_time.as_millis(),
                            last_activity.as_millis()
                        );
                    }
                    stale = last_activity > self.stale_after;
                }
                (
                    entry.in_use(),
                    entry.is_connected(),
                    entry.is_dynamic(),
                    stale,
                    entry.idle_age(now),
                )
            };

            if !connected {
                if in_use {
                    warn!(self.log, "{} inactive entry {} marked in use", self.name, id);
                    data.entries.get_mut(&id).unwrap().close();
                } else {
                    debug!(self.log, "{} skipping inactive entry {}", self.name, id);
                }
            } else if in_use && stale {
                self.reclaim_locked(&mut data, id);
            } else if dynamic && !in_use {
                if idle_age > self.stale_after {
                    info!(
                        self.log,
                        "{} retiring dynamic entry {} after {}ms idle",
                        self.name,
                        id,
                        idle_age.as_millis()
                    );
                    data.entries.get_mut(&id).unwrap().close();
                    match data.idle.iter().position(|i| *i == id) {
                        Some(pos) => {
                            data.idle.remove(pos);
                        }
                        None => warn!(
                            self.log,
                            "{} dynamic entry {} was not in the idle set", self.name, id
                        ),
                    }
                }
            } else if in_use {
                info!(
                    self.log,
                    "{} entry {} in use ({})",
                    self.name,
                    id,
                    data.entries.get(&id).unwrap().borrower_label()
                );
            } else {
                // Idle persistent entry: probe it, reconnecting on failure.
                let ok = data.entries.get_mut(&id).unwrap().check_resource();
                if ok {
                    debug!(self.log, "{} validated entry {} - OK", self.name, id);
                } else {
                    warn!(
                        self.log,
                        "{} validation failed for entry {}, reconnecting", self.name, id
                    );
                    data.entries.get_mut(&id).unwrap().close();
                    if let Some(pos) = data.idle.iter().position(|i| *i == id) {
                        data.idle.remove(pos);
                        debug!(
                            self.log,
                            "{} validator removed {} from the idle set", self.name, id
                        );
                    }
                    match data.entries.get_mut(&id).unwrap().connect_with(&self.create) {
                        Ok(()) => self.add_idle_locked(&mut data, id),
                        Err(e) => {
                            // Left inactive; the next cycle retries.
                            error!(
                                self.log,
                                "{} error reconnecting entry {} - {}", self.name, id, e
                            );
                            self.counters.count_error();
                        }
                    }
                }
            }
        }
        drop(data);
        debug!(self.log, "{} {} validator completed", self.name, R::KIND);
    }

    /// Forcibly reclaims a stale in-use entry. The holder is not asked to
    /// stop: its handle is invalidated, the busy time is booked, and a
    /// persistent entry is rebuilt from the factory. Whatever the holder
    /// still has closes when its handle finally drops.
    fn reclaim_locked(&self, data: &mut PoolData<R>, id: EntryId) {
        {
            let entry = data.entries.get_mut(&id).unwrap();
            let use_time = entry.current_use_time();
            self.counters.record_borrow(use_time);
            error!(
                self.log,
                "{} forcibly reclaiming stale entry {} after {}ms (borrower: {})",
                self.name,
                id,
                use_time.as_millis(),
                entry.borrower_label()
            );
            entry.close();
            self.counters.count_error();
        }
        let dynamic = data.entries.get(&id).map(|e| e.is_dynamic()).unwrap_or(true);
        if !dynamic {
            match data.entries.get_mut(&id).unwrap().connect_with(&self.create) {
                Ok(()) => self.add_idle_locked(data, id),
                Err(e) => error!(
                    self.log,
                    "{} cannot reconnect reclaimed entry {} - {}", self.name, id, e
                ),
            }
        }
    }

    /// Dumps every entry's state when the pool comes up full, rate-limited
    /// so sustained overload does not flood the log.
    fn dump_entries(&self, data: &PoolData<R>) {
        let now = now_millis();
        let last = self.counters.last_full_ms.load(AtomicOrdering::Relaxed);
        if now.saturating_sub(last) > FULL_DUMP_INTERVAL_MS {
            error!(
                self.log,
                "{} pool full, idle = {:?}", self.name, data.idle
            );
            for entry in data.entries.values() {
                let info = entry.info();
                error!(
                    self.log,
                    "{} entry {} connected = {}, in_use = {}, busy {}ms (borrower: {})",
                    self.name,
                    info.id,
                    info.connected,
                    info.in_use,
                    info.current_use.as_millis(),
                    entry.borrower_label()
                );
            }
        }
        self.counters
            .last_full_ms
            .store(now, AtomicOrdering::Relaxed);
    }
}

/// Picks the best idle entry per the ordering policy and removes it from
/// the idle set.
fn pop_best_idle<R>(data: &mut PoolData<R>) -> Option<EntryId>
where
    R: Resource,
{
    let PoolData {
        ref entries,
        ref idle,
        ..
    } = *data;
    let best = idle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| match (entries.get(*a), entries.get(*b)) {
            (Some(ea), Some(eb)) => order::compare(ea, eb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .map(|(pos, _)| pos)?;
    Some(data.idle.swap_remove(best))
}

/// The object callers actually hold: a reserved resource bound to one pool
/// entry. Dereferences to the resource; mutation records activity for the
/// monitor's staleness checks. Dropping the handle returns the resource to
/// the pool -- there is no way to bypass pool accounting.
pub struct PoolHandle<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    pool: ResourcePool<R, F>,
    id: EntryId,
    generation: u64,
    use_count: u64,
    last_access: Arc<AtomicU64>,
    resource: Option<R>,
}

impl<R, F> PoolHandle<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    /// The id of the pool entry backing this handle.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// When the resource was last accessed through this handle.
    pub fn last_access(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_access.load(AtomicOrdering::Relaxed))
    }
}

impl<R, F> Deref for PoolHandle<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().unwrap()
    }
}

impl<R, F> DerefMut for PoolHandle<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    fn deref_mut(&mut self) -> &mut R {
        self.last_access
            .store(now_millis(), AtomicOrdering::Relaxed);
        self.resource.as_mut().unwrap()
    }
}

impl<R, F> Drop for PoolHandle<R, F>
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release_parts(self.id, self.generation, resource);
        }
    }
}
