/*
 * Copyright 2025 Joyent, Inc.
 */

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use slog::debug;

use crate::entry::EntryId;
use crate::pool::PoolShared;
use crate::resource::Resource;

/// Wakeup signal for the monitor thread. The monitor sleeps on the condvar
/// for one interval at a time; anyone holding a clone can poke it to
/// request an immediate out-of-cycle validation pass.
pub(crate) struct MonitorSignal(Arc<(Mutex<bool>, Condvar)>);

impl MonitorSignal {
    pub(crate) fn new() -> MonitorSignal {
        MonitorSignal(Arc::new((Mutex::new(false), Condvar::new())))
    }

    pub(crate) fn poke(&self) {
        let (lock, cvar) = &*self.0;
        let mut requested = lock.lock().unwrap();
        *requested = true;
        cvar.notify_one();
    }

    /// Waits until the signal is raised or the timeout elapses, whichever
    /// comes first, clearing the signal on the way out. Returns whether the
    /// wakeup was requested rather than timed out.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.0;
        let mut requested = lock.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while !*requested {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = cvar.wait_timeout(requested, deadline - now).unwrap();
            requested = guard;
        }
        let poked = *requested;
        *requested = false;
        poked
    }
}

impl Clone for MonitorSignal {
    fn clone(&self) -> MonitorSignal {
        MonitorSignal(Arc::clone(&self.0))
    }
}

/// Body of the dedicated monitor thread: one validation pass per interval,
/// or sooner when poked, until the pool shuts down.
pub(crate) fn monitor_loop<R, F>(shared: Arc<PoolShared<R, F>>)
where
    R: Resource,
    F: Fn(EntryId) -> R + Send + Sync + 'static,
{
    debug!(
        shared.log,
        "starting {} monitor, interval {:?}", shared.name, shared.monitor_interval
    );

    loop {
        let poked = shared.monitor.wait(shared.monitor_interval);
        if shared.is_closed() {
            break;
        }
        if poked {
            debug!(shared.log, "{} monitor poked for an early pass", shared.name);
        }
        shared.validate();
    }

    debug!(shared.log, "{} monitor stopped", shared.name);
}
