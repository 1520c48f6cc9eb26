/*
 * Copyright 2025 Joyent, Inc.
 */

//! Redis resource adapter for the bankshot pool.
//!
//! Wraps a synchronous `redis::Connection` so that cache-server links can
//! be managed by a
//! [`ResourcePool`](../bankshot/pool/struct.ResourcePool.html). The
//! liveness probe is a `PING` round trip and the release cleanup issues
//! `RESET` to drop any session state a caller left behind. Both TCP and
//! Unix-domain-socket addressing are supported.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::Duration;

use redis::{
    Client, Connection, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
};

use bankshot::entry::EntryId;
use bankshot::resource::Resource;

/// Connection settings for a pooled Redis link.
#[derive(Clone)]
pub struct RedisConfig {
    pub addr: RedisAddr,
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone)]
pub enum RedisAddr {
    Tcp(String, u16),
    /// A Unix domain socket path, for servers colocated with the
    /// application host.
    Unix(PathBuf),
}

impl RedisConfig {
    pub fn tcp(host: &str, port: u16) -> RedisConfig {
        RedisConfig {
            addr: RedisAddr::Tcp(String::from(host), port),
            db: 0,
            username: None,
            password: None,
        }
    }

    pub fn unix<P: Into<PathBuf>>(path: P) -> RedisConfig {
        RedisConfig {
            addr: RedisAddr::Unix(path.into()),
            db: 0,
            username: None,
            password: None,
        }
    }
}

pub struct RedisConnection {
    pub connection: Option<Connection>,
    config: RedisConfig,
}

impl RedisConnection {
    pub fn new(config: RedisConfig) -> RedisConnection {
        RedisConnection {
            connection: None,
            config,
        }
    }

    /// Returns the factory closure handed to `ResourcePool::new`.
    pub fn creator(
        config: RedisConfig,
    ) -> impl Fn(EntryId) -> RedisConnection + Send + Sync + 'static {
        move |_id| RedisConnection::new(config.clone())
    }

    fn connection_info(&self) -> ConnectionInfo {
        let addr = match &self.config.addr {
            RedisAddr::Tcp(host, port) => ConnectionAddr::Tcp(host.clone(), *port),
            RedisAddr::Unix(path) => ConnectionAddr::Unix(path.clone()),
        };
        ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: self.config.db,
                username: self.config.username.clone(),
                password: self.config.password.clone(),
            },
        }
    }
}

impl Resource for RedisConnection {
    type Error = RedisError;

    const KIND: &'static str = "Redis";

    const STALE_AFTER: Duration = Duration::from_millis(5_000);

    fn connect(&mut self) -> Result<(), Self::Error> {
        let client = Client::open(self.connection_info())?;
        let connection = client.get_connection()?;
        self.connection = Some(connection);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        // Dropping the connection closes the underlying socket.
        self.connection = None;
        Ok(())
    }

    fn check(&mut self) -> bool {
        match self.connection.as_mut() {
            Some(connection) => redis::cmd("PING")
                .query::<String>(connection)
                .map(|pong| pong == "PONG")
                .unwrap_or(false),
            None => false,
        }
    }

    fn cleanup(&mut self) -> Result<(), Self::Error> {
        // Drop subscriptions, MULTI state, and WATCHed keys left by the
        // previous caller.
        if let Some(connection) = self.connection.as_mut() {
            redis::cmd("RESET").query::<()>(connection)?;
        }
        Ok(())
    }
}

impl Deref for RedisConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection.as_ref().unwrap()
    }
}

impl DerefMut for RedisConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().unwrap()
    }
}
