/*
 * Copyright 2025 Joyent, Inc.
 */

//! PostgreSQL resource adapter for the bankshot pool.
//!
//! Wraps a synchronous `postgres::Client` so that SQL connections can be
//! managed by a [`ResourcePool`](../bankshot/pool/struct.ResourcePool.html).
//! The liveness probe runs a configurable validation query and the release
//! cleanup rolls back any transaction a caller left uncommitted.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use native_tls::{Certificate, TlsConnector};
use postgres::config::SslMode;
use postgres::{Client, Config, NoTls};
use postgres_native_tls::MakeTlsConnector;

use bankshot::entry::EntryId;
use bankshot::resource::Resource;

/// Connection settings for a pooled PostgreSQL client.
#[derive(Clone)]
pub struct PostgresConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub application_name: Option<String>,
    /// Query run by the liveness probe.
    pub validation_query: String,
    pub tls: PostgresTls,
}

impl PostgresConfig {
    pub fn new(host: &str, port: u16) -> PostgresConfig {
        PostgresConfig {
            user: None,
            password: None,
            host: String::from(host),
            port,
            database: None,
            application_name: None,
            validation_query: String::from("SELECT 1"),
            tls: PostgresTls::Disable,
        }
    }
}

#[derive(Clone)]
pub enum PostgresTls {
    Disable,
    /// Require TLS, verifying the server against the given root
    /// certificate. With no certificate, server verification is disabled.
    Require(Option<Certificate>),
}

pub struct PostgresConnection {
    pub client: Option<Client>,
    config: PostgresConfig,
}

impl PostgresConnection {
    pub fn new(config: PostgresConfig) -> PostgresConnection {
        PostgresConnection {
            client: None,
            config,
        }
    }

    /// Returns the factory closure handed to `ResourcePool::new`.
    pub fn creator(
        config: PostgresConfig,
    ) -> impl Fn(EntryId) -> PostgresConnection + Send + Sync + 'static {
        move |_id| PostgresConnection::new(config.clone())
    }

    fn pg_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        // The original pool capped driver login time at two seconds; a slow
        // connect should fail fast and let the monitor retry.
        config.connect_timeout(Duration::from_secs(2));
        if let Some(user) = &self.config.user {
            config.user(user);
        }
        if let Some(password) = &self.config.password {
            config.password(password);
        }
        if let Some(database) = &self.config.database {
            config.dbname(database);
        }
        if let Some(application_name) = &self.config.application_name {
            config.application_name(application_name);
        }
        config.ssl_mode(match self.config.tls {
            PostgresTls::Disable => SslMode::Disable,
            PostgresTls::Require(_) => SslMode::Require,
        });
        config
    }
}

impl Resource for PostgresConnection {
    type Error = postgres::Error;

    const KIND: &'static str = "PostgreSQL";

    const STALE_AFTER: Duration = Duration::from_millis(145_000);

    fn connect(&mut self) -> Result<(), Self::Error> {
        let config = self.pg_config();
        let client = match make_tls_connector(&self.config.tls) {
            Some(connector) => config.connect(connector)?,
            None => config.connect(NoTls)?,
        };
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        match self.client.take() {
            Some(client) => client.close(),
            None => Ok(()),
        }
    }

    fn check(&mut self) -> bool {
        match self.client.as_mut() {
            Some(client) => client
                .simple_query(&self.config.validation_query)
                .is_ok(),
            None => false,
        }
    }

    fn cleanup(&mut self) -> Result<(), Self::Error> {
        // A caller may have returned the connection mid-transaction; roll
        // back anything pending before the next caller sees it.
        if let Some(client) = self.client.as_mut() {
            client.batch_execute("ROLLBACK")?;
        }
        Ok(())
    }
}

impl Deref for PostgresConnection {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

impl DerefMut for PostgresConnection {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().unwrap()
    }
}

fn make_tls_connector(tls: &PostgresTls) -> Option<MakeTlsConnector> {
    match tls {
        PostgresTls::Disable => None,
        PostgresTls::Require(Some(cert)) => {
            // Root cert supplied, use it to verify server certs.
            let connector = TlsConnector::builder()
                .add_root_certificate(cert.clone())
                .build()
                .unwrap();
            Some(MakeTlsConnector::new(connector))
        }
        PostgresTls::Require(None) => {
            // No cert given, disable certificate verification.
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap();
            Some(MakeTlsConnector::new(connector))
        }
    }
}
