/*
 * Copyright 2025 Joyent, Inc.
 */

use std::error;
use std::time::Duration;

/// Bankshot pooled resource
///
/// The `Resource` trait defines the interface that must be implemented in
/// order to participate in a bankshot resource pool. A resource need not be
/// limited to a TCP socket, but could be any scarce, expensive-to-create
/// handle that implements the `Resource` trait. The pool engine, entry
/// bookkeeping, monitor, and ordering policy are identical for every
/// implementation; this trait is the only place resource-kind-specific
/// behavior enters the system.
pub trait Resource: Send + Sized + 'static {
    /// The error type returned by the fallible resource operations. This is
    /// an associated type for the trait meaning each specific implementation
    /// of the `Resource` trait may choose the appropriate concrete error
    /// type to return. The selected error type must implement the
    /// [Error](https://doc.rust-lang.org/std/error/trait.Error.html) trait
    /// from the standard library and be safe to move across threads, so the
    /// pool can carry it to whichever caller the failure belongs to.
    type Error: error::Error + Send + Sync + 'static;

    /// A short human-readable name for this resource kind, used in logging
    /// and in the administrative statistics surface.
    const KIND: &'static str;

    /// The staleness budget for this resource kind. A reservation held
    /// longer than this without any activity through the handle is eligible
    /// for forced reclaim, and an idle dynamic entry older than this is
    /// eligible for teardown. May be overridden per pool in the options.
    const STALE_AFTER: Duration;

    /// Attempt to establish the underlying resource. Called for the initial
    /// connect and for every reconnect after a close; implementations must
    /// support being connected again after `close`.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the underlying resource. The pool treats close failures as
    /// best-effort and swallows them.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Liveness probe, e.g. a trivial round-trip query or ping. Returns
    /// `false` when the resource should be torn down and reconnected.
    fn check(&mut self) -> bool;

    /// Reset session-level state before the resource goes back to the idle
    /// set, e.g. rolling back an uncommitted transaction. Errors are caught
    /// at the pool boundary, counted, and trigger an out-of-cycle
    /// validation run.
    fn cleanup(&mut self) -> Result<(), Self::Error>;
}
