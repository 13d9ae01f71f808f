//! Bounded Postgres connection pool with scoped leases.
//!
//! Connections open lazily on first use. A lease is a [`PooledConnection`] guard: it goes back
//! to the pool when released or dropped, on success and error paths alike, and ownership makes
//! a double release impossible.

use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{
    ClientWrapper, Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime,
    TimeoutType,
};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, VectorError};
use crate::table::quote_ident;

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Leases handed out since the pool was built.
    pub acquired: usize,
    /// Leases currently checked out.
    pub in_use: usize,
    /// Connections currently open (idle or leased).
    pub open: usize,
    /// Configured upper bound on open connections.
    pub max_size: usize,
}

#[derive(Debug, Default)]
struct LeaseCounters {
    acquired: AtomicUsize,
    in_use: AtomicUsize,
}

/// Shared handle to the connection pool; cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool,
    acquire_timeout: Duration,
    counters: Arc<LeaseCounters>,
}

impl ConnectionPool {
    /// Builds the pool without dialing Postgres.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let mut pg_config = tokio_postgres::Config::from_str(&config.database_url)
            .map_err(|err| VectorError::InvalidConfig(format!("invalid database URL: {err}")))?;
        pg_config.connect_timeout(config.connect_timeout);
        pg_config.options(&session_options(config));

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .wait_timeout(Some(config.acquire_timeout))
            .create_timeout(Some(config.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| VectorError::InvalidConfig(format!("failed to build pool: {err}")))?;

        debug!(
            max_size = config.pool_size,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "connection pool ready"
        );
        Ok(Self {
            pool,
            acquire_timeout: config.acquire_timeout,
            counters: Arc::new(LeaseCounters::default()),
        })
    }

    /// Leases a connection, waiting up to the acquire timeout for one to free up.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let conn = self.pool.get().await.map_err(|err| self.lease_error(err))?;
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        self.counters.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Returns a lease to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Closes every connection; later `acquire()` calls fail with `PoolClosed`.
    pub fn shutdown(&self) {
        if self.pool.is_closed() {
            return;
        }
        self.pool.close();
        info!(
            acquired = self.counters.acquired.load(Ordering::Relaxed),
            "connection pool closed"
        );
    }

    /// Whether `shutdown()` has run.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Current usage counters.
    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            in_use: self.counters.in_use.load(Ordering::Acquire),
            open: status.size,
            max_size: status.max_size,
        }
    }

    fn lease_error(&self, err: PoolError) -> VectorError {
        match err {
            PoolError::Closed => VectorError::PoolClosed,
            PoolError::Timeout(TimeoutType::Wait) => {
                warn!(
                    waited_ms = self.acquire_timeout.as_millis() as u64,
                    "connection pool exhausted"
                );
                VectorError::PoolExhausted {
                    waited: self.acquire_timeout,
                }
            }
            PoolError::Timeout(kind) => {
                VectorError::Storage(format!("timed out opening connection ({kind:?})"))
            }
            PoolError::Backend(err) => VectorError::from(err),
            other => VectorError::Storage(other.to_string()),
        }
    }
}

/// A leased connection; derefs to the pooled client.
pub struct PooledConnection {
    conn: Object,
    counters: Arc<LeaseCounters>,
}

impl Deref for PooledConnection {
    type Target = ClientWrapper;

    fn deref(&self) -> &ClientWrapper {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut ClientWrapper {
        &mut self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.counters.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

// Every session bounds statement time and resolves the vector type through the store schema,
// whichever schema the extension was originally installed into. The schema is quoted so a
// mixed-case name is not folded to lowercase.
fn session_options(config: &StoreConfig) -> String {
    format!(
        "-c statement_timeout={} -c search_path={},public",
        config.statement_timeout.as_millis(),
        quote_ident(&config.schema)
    )
}
