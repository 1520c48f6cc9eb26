/*
 * Copyright 2025 Joyent, Inc.
 */

use std::error::Error as StdError;
use std::fmt;

/// Errors surfaced by a resource pool.
///
/// `PoolFull` is an expected backpressure signal and is counted rather than
/// logged; callers are expected to apply their own retry policy. The other
/// variants are genuine failures of the call that raised them.
#[derive(Debug)]
pub enum Error {
    /// Invalid pool or adapter configuration. Fatal to the call, never
    /// retried internally.
    Configuration(String),
    /// Every entry is reserved and the bounded wait expired.
    PoolFull,
    /// A pool contract violation: double reserve, release of an unknown or
    /// stale handle, or use of a closed pool.
    IllegalState(String),
    /// A failure reported by the underlying resource adapter.
    Resource(Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn illegal_state<S: Into<String>>(msg: S) -> Error {
        Error::IllegalState(msg.into())
    }

    pub(crate) fn resource<E>(err: E) -> Error
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Resource(Box::new(err))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(fmt, "configuration error: {}", msg),
            Error::PoolFull => write!(fmt, "resource pool full"),
            Error::IllegalState(msg) => write!(fmt, "illegal pool state: {}", msg),
            Error::Resource(err) => err.fmt(fmt),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Resource(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
