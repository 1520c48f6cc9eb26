// Copyright 2025 Joyent, Inc.

//! A self-healing pool of expensive-to-create resources
//!
//! Bankshot is a library for managing a bounded pool of scarce, costly
//! resources -- database connections, cache-server links -- shared by many
//! concurrent callers. The pool hands resources out under a hard size cap,
//! recycles them safely, detects and replaces dead or stuck resources, and
//! degrades gracefully under overload instead of crashing callers. One
//! trait, [`Resource`](resource/trait.Resource.html), is the only place
//! resource-kind-specific behavior enters the system; the engine, entry
//! bookkeeping, monitor, and ordering policy are identical for every
//! implementation.
//!
//! ## Resources
//!
//! In bankshot, a *resource* is not necessarily just a TCP socket. It can be
//! anything scarce and expensive to establish, as long as it can be
//! connected, probed, reset, and closed through the
//! [`Resource`](resource/trait.Resource.html) trait. In addition to a
//! [`Resource`](resource/trait.Resource.html) implementation, bankshot users
//! provide the pool with a function to build one unconnected resource
//! instance per pool entry:
//! ```rust.ignore
//! Fn(EntryId) -> R + Send + Sync + 'static
//! where R: Resource
//! ```
//! The purpose of this function is to capture application-level
//! configuration required to establish the resource. *e.g.* a database
//! connection might require a database name and credentials.
//!
//! ## Sizing
//!
//! The pool is seeded with a configurable number of *persistent* entries
//! which are reconnected, rather than destroyed, when they fail. Under load
//! the pool grows on demand up to its maximum size with *dynamic* entries,
//! which are torn down again once they go stale. When every entry is busy
//! and the cap is reached, a claim waits once for a bounded interval and
//! then fails with a pool-full error; it never waits forever and never
//! retries internally, so callers can apply their own backoff policy.
//!
//! ## Self-healing
//!
//! A monitor thread periodically walks every entry: reservations held past
//! their staleness budget without activity are forcibly reclaimed, stale
//! idle dynamic entries are retired, and idle persistent entries are probed
//! for liveness and reconnected when the probe fails. An errored release
//! triggers an immediate out-of-cycle pass. Failures on one entry are
//! counted and logged, and never disturb the others.
//!
//! ## Example
//!
//! Here is an example that uses a hypothetical
//! [`Resource`](resource/trait.Resource.html) implementation to create a
//! bankshot pool.
//!
//! ```rust,ignore
//! use std::sync::Mutex;
//! use std::thread;
//!
//! use slog::{Drain, Logger, o};
//!
//! use bankshot::pool::types::PoolOptions;
//! use bankshot::pool::ResourcePool;
//!
//! let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
//! let log = Logger::root(
//!     Mutex::new(
//!         slog_term::FullFormat::new(plain).build()
//!     ).fuse(),
//!     o!("build-id" => "0.1.0")
//! );
//!
//! let options = PoolOptions::new("widgets", 10, log);
//! let pool = ResourcePool::new(options, |_id| WidgetLink::new(config.clone()));
//! pool.connect(4).expect("error seeding pool");
//!
//! for _ in 0..10 {
//!     let pool = pool.clone();
//!     thread::spawn(move || {
//!         let mut link = pool.claim()?;
//!         // Do stuff here
//!         // The resource is returned to the pool when the handle falls
//!         // out of scope.
//!     })
//! }
//! ```
//!
//! There are implementations of the
//! [`Resource`](resource/trait.Resource.html) trait for PostgreSQL
//! connections and Redis links under `connections/` in this repository.

#![allow(missing_docs)]

pub mod entry;
pub mod error;
mod monitor;
mod order;
pub mod pool;
pub mod resource;
