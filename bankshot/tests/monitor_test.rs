use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slog::{o, Logger};

use bankshot::entry::EntryId;
use bankshot::pool::types::PoolOptions;
use bankshot::pool::ResourcePool;
use bankshot::resource::Resource;

#[derive(Debug)]
pub struct FlakyResource {
    connected: bool,
    healthy: Arc<AtomicBool>,
    connects: Arc<AtomicU32>,
}

impl Resource for FlakyResource {
    type Error = io::Error;

    const KIND: &'static str = "Flaky";

    const STALE_AFTER: Duration = Duration::from_secs(60);

    fn connect(&mut self) -> Result<(), io::Error> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), io::Error> {
        self.connected = false;
        Ok(())
    }

    fn check(&mut self) -> bool {
        self.connected && self.healthy.load(Ordering::Relaxed)
    }

    fn cleanup(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

fn flaky_creator(
    healthy: Arc<AtomicBool>,
    connects: Arc<AtomicU32>,
) -> impl Fn(EntryId) -> FlakyResource + Send + Sync + 'static {
    move |_id| FlakyResource {
        connected: false,
        healthy: Arc::clone(&healthy),
        connects: Arc::clone(&connects),
    }
}

fn quiet_options(name: &str, max_size: u32) -> PoolOptions {
    let mut options = PoolOptions::new(name, max_size, Logger::root(slog::Discard, o!()));
    options.full_wait = Duration::from_millis(100);
    // Keep the background monitor out of the way; tests drive validation
    // explicitly unless they say otherwise.
    options.monitor_interval = Duration::from_secs(3600);
    options
}

#[test]
fn validator_reconnects_unhealthy_idle_entry() {
    let healthy = Arc::new(AtomicBool::new(true));
    let connects = Arc::new(AtomicU32::new(0));
    let pool = ResourcePool::new(
        quiet_options("unhealthy", 1),
        flaky_creator(Arc::clone(&healthy), Arc::clone(&connects)),
    );
    pool.connect(1).unwrap();

    // First pass: the probe succeeds and the entry is left alone.
    pool.validate();
    let entries = pool.entries();
    assert_eq!(entries[0].check_count, 1);
    assert_eq!(entries[0].connect_count, 1);
    assert_eq!(pool.stats().idle, 1);

    // Break the resource: the next pass closes and reconnects it, and the
    // entry is back in the idle set exactly once.
    healthy.store(false, Ordering::Relaxed);
    pool.validate();
    healthy.store(true, Ordering::Relaxed);

    let entries = pool.entries();
    assert_eq!(entries[0].connect_count, 2);
    assert!(entries[0].connected);
    assert!(!entries[0].in_use);
    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.size, 1);
    assert!(pool.claim().is_ok());
}

#[test]
fn validator_reclaims_stale_reservation() {
    let healthy = Arc::new(AtomicBool::new(true));
    let connects = Arc::new(AtomicU32::new(0));
    let mut options = quiet_options("stuck", 1);
    options.stale_after = Some(Duration::from_millis(50));
    options.log_borrowers = true;
    let pool = ResourcePool::new(
        options,
        flaky_creator(Arc::clone(&healthy), Arc::clone(&connects)),
    );
    pool.connect(1).unwrap();

    let claim = pool.claim_tagged("sleepy-worker").unwrap();
    thread::sleep(Duration::from_millis(120));
    pool.validate();

    // The reservation was reclaimed out from under the holder: busy time
    // booked, the persistent entry rebuilt and re-idled.
    let entries = pool.entries();
    assert!(!entries[0].in_use);
    assert!(entries[0].connected);
    assert_eq!(entries[0].connect_count, 2);
    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert!(stats.error_count >= 1);
    assert!(stats.max_borrow >= Duration::from_millis(100));
    assert!(stats.max_borrow < Duration::from_secs(10));

    // The abandoned handle is now stale; returning it is counted and
    // discarded rather than corrupting the idle set.
    let errors_before = stats.error_count;
    drop(claim);
    let stats = pool.stats();
    assert!(stats.error_count > errors_before);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.size, 1);

    assert!(pool.claim().is_ok());
}

#[test]
fn active_reservations_are_not_reclaimed() {
    let healthy = Arc::new(AtomicBool::new(true));
    let connects = Arc::new(AtomicU32::new(0));
    let mut options = quiet_options("busy", 1);
    options.stale_after = Some(Duration::from_millis(80));
    let pool = ResourcePool::new(
        options,
        flaky_creator(Arc::clone(&healthy), Arc::clone(&connects)),
    );
    pool.connect(1).unwrap();

    let mut claim = pool.claim().unwrap();
    // Keep touching the resource past the staleness budget; a slow caller
    // that is still active must be left alone.
    for _ in 0..6 {
        thread::sleep(Duration::from_millis(25));
        let _ = claim.check();
    }
    pool.validate();

    let entries = pool.entries();
    assert!(entries[0].in_use);
    assert_eq!(entries[0].connect_count, 1);
    drop(claim);
    assert_eq!(pool.stats().idle, 1);
}

#[test]
fn stale_idle_dynamic_entry_is_retired() {
    let healthy = Arc::new(AtomicBool::new(true));
    let connects = Arc::new(AtomicU32::new(0));
    let mut options = quiet_options("elastic", 2);
    options.stale_after = Some(Duration::from_millis(50));
    let pool = ResourcePool::new(
        options,
        flaky_creator(Arc::clone(&healthy), Arc::clone(&connects)),
    );
    pool.connect(0).unwrap();

    let claim = pool.claim().unwrap();
    drop(claim);
    assert_eq!(pool.stats().idle, 1);

    // Too fresh to retire.
    pool.validate();
    assert_eq!(pool.stats().idle, 1);

    thread::sleep(Duration::from_millis(120));
    pool.validate();

    // The dynamic entry is gone from the idle set but retained, inactive,
    // for statistics and eventual reuse.
    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.size, 1);
    let entries = pool.entries();
    assert!(entries[0].dynamic);
    assert!(!entries[0].connected);
    assert!(!entries[0].in_use);

    // A later claim revives the retired entry instead of growing the pool.
    let claim = pool.claim().unwrap();
    assert_eq!(claim.id(), EntryId::from(1));
    assert_eq!(pool.stats().size, 1);
}

#[test]
fn monitor_thread_reclaims_on_its_own() {
    let healthy = Arc::new(AtomicBool::new(true));
    let connects = Arc::new(AtomicU32::new(0));
    let mut options = quiet_options("watched", 1);
    options.stale_after = Some(Duration::from_millis(50));
    options.monitor_interval = Duration::from_millis(50);
    let pool = ResourcePool::new(
        options,
        flaky_creator(Arc::clone(&healthy), Arc::clone(&connects)),
    );
    pool.connect(1).unwrap();

    let _claim = pool.claim().unwrap();

    // No manual validation: the monitor thread must notice the stale
    // reservation by itself.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = pool.stats();
        if stats.idle == 1 && stats.validations >= 1 {
            break;
        }
        if Instant::now() >= deadline {
            panic!("monitor never reclaimed the stale reservation");
        }
        thread::sleep(Duration::from_millis(20));
    }

    let entries = pool.entries();
    assert!(!entries[0].in_use);
    assert_eq!(entries[0].connect_count, 2);
}

#[test]
fn failed_cleanup_requests_an_early_pass() {
    // A resource whose cleanup always fails; the release path should poke
    // the monitor rather than wait out its hour-long interval.
    #[derive(Debug)]
    struct DirtyResource;

    impl Resource for DirtyResource {
        type Error = io::Error;
        const KIND: &'static str = "Dirty";
        const STALE_AFTER: Duration = Duration::from_secs(60);

        fn connect(&mut self) -> Result<(), io::Error> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), io::Error> {
            Ok(())
        }

        fn check(&mut self) -> bool {
            true
        }

        fn cleanup(&mut self) -> Result<(), io::Error> {
            Err(io::Error::new(io::ErrorKind::Other, "session reset failed"))
        }
    }

    let pool = ResourcePool::new(quiet_options("poked", 1), |_id| DirtyResource);
    pool.connect(1).unwrap();

    assert_eq!(pool.stats().validations, 0);
    let claim = pool.claim().unwrap();
    drop(claim);

    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.stats().validations == 0 {
        if Instant::now() >= deadline {
            panic!("cleanup failure never triggered a validation pass");
        }
        thread::sleep(Duration::from_millis(10));
    }
}
