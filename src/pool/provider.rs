//! Backend connection pools
//!
//! One deadpool [`managed::Pool`] per [`BackendTarget`], kept in a
//! concurrent registry. The pool hands out [`PooledConnection`]s; a session
//! gives each back through [`ConnectionPool::release`], stating whether the
//! connection is still healthy.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool::managed::{self, PoolError};
use tokio::sync::watch;
use tracing::{Level, debug, event, info};

use super::connection_guard::remove_from_pool;
use super::health_check::run_periodic_health_checks;
use super::manager::BackendManager;
use crate::connection_error::ConnectionError;
use crate::error::ProxyError;
use crate::tls::TlsManager;

pub type Pool = managed::Pool<BackendManager>;

/// A checked-out backend connection; dropping it returns it to the pool
pub type PooledConnection = managed::Object<BackendManager>;

/// A logical backend, identified by host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
}

impl BackendTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings shared by every per-target pool
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    /// How long `acquire` waits for a free slot
    pub wait_timeout: Duration,
    pub health_check_interval: Option<Duration>,
    pub tls: Option<TlsManager>,
}

/// Snapshot of one target's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently owned by the pool, idle or checked out
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
    /// Sockets ever opened for this target
    pub created: u64,
}

/// Pool for a single backend target
#[derive(Debug, Clone)]
pub struct BackendPool {
    pool: Pool,
}

impl BackendPool {
    fn new(
        target: BackendTarget,
        settings: &PoolSettings,
        total_created: Arc<AtomicU64>,
    ) -> Result<Self, ProxyError> {
        let backend = target.to_string();
        let manager = BackendManager::new(
            target,
            settings.connect_timeout,
            settings.tls.clone(),
            total_created,
        );
        let pool = Pool::builder(manager)
            .max_size(settings.max_connections)
            .wait_timeout(Some(settings.wait_timeout))
            .create_timeout(Some(settings.connect_timeout))
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| ProxyError::BackendUnavailable {
                backend: backend.clone(),
                reason: format!("pool setup failed: {e}"),
                timed_out: false,
            })?;

        info!(
            backend = %backend,
            max_connections = settings.max_connections,
            tls = settings.tls.is_some(),
            "Created backend connection pool"
        );
        Ok(Self { pool })
    }

    #[must_use]
    pub fn target(&self) -> &BackendTarget {
        self.pool.manager().target()
    }

    /// An idle connection that passes the liveness check, or a new one
    pub async fn acquire(&self) -> Result<PooledConnection, ProxyError> {
        self.pool.get().await.map_err(|e| self.acquire_error(e))
    }

    fn acquire_error(&self, err: PoolError<ConnectionError>) -> ProxyError {
        let backend = self.target().to_string();
        match err {
            PoolError::Backend(e) => {
                event_at_level(e.log_level(), &backend, &e);
                ProxyError::BackendUnavailable {
                    backend,
                    timed_out: e.is_timeout(),
                    reason: e.to_string(),
                }
            }
            PoolError::Timeout(kind) => ProxyError::BackendUnavailable {
                backend,
                reason: format!("timed out waiting for a connection ({kind:?})"),
                timed_out: true,
            },
            PoolError::Closed => ProxyError::ShuttingDown,
            other => ProxyError::BackendUnavailable {
                backend,
                reason: other.to_string(),
                timed_out: false,
            },
        }
    }

    #[must_use]
    pub fn connections_created(&self) -> u64 {
        self.pool.manager().connections_created()
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            created: self.connections_created(),
        }
    }

    /// Drop every idle connection, returning how many went
    pub fn clear_idle(&self) -> usize {
        self.pool.retain(|_, _| false).removed.len()
    }

    fn close(&self) {
        let status = self.pool.status();
        info!(
            backend = %self.target(),
            idle = status.available,
            in_use = status.size.saturating_sub(status.available),
            "Closing backend connection pool"
        );
        self.pool.close();
    }
}

fn event_at_level(level: Level, backend: &str, err: &ConnectionError) {
    if level == Level::ERROR {
        event!(Level::ERROR, backend, error = %err, "Backend connection failed");
    } else if level == Level::WARN {
        event!(Level::WARN, backend, error = %err, "Backend connection failed");
    } else {
        event!(Level::DEBUG, backend, error = %err, "Backend connection failed");
    }
}

/// Registry of per-target pools plus the process-wide creation counter
#[derive(Debug)]
pub struct ConnectionPool {
    pools: DashMap<BackendTarget, BackendPool>,
    settings: PoolSettings,
    total_created: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(settings: PoolSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pools: DashMap::new(),
            settings,
            total_created: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
        }
    }

    /// The pool for `target`, created on first use
    pub fn pool_for(&self, target: &BackendTarget) -> Result<BackendPool, ProxyError> {
        if let Some(existing) = self.pools.get(target) {
            return Ok(existing.clone());
        }
        match self.pools.entry(target.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let pool = BackendPool::new(
                    target.clone(),
                    &self.settings,
                    Arc::clone(&self.total_created),
                )?;
                if let Some(interval) = self.settings.health_check_interval {
                    tokio::spawn(run_periodic_health_checks(
                        pool.pool.clone(),
                        interval,
                        self.shutdown_tx.subscribe(),
                    ));
                }
                slot.insert(pool.clone());
                Ok(pool)
            }
        }
    }

    pub async fn acquire(&self, target: &BackendTarget) -> Result<PooledConnection, ProxyError> {
        if *self.shutdown_tx.borrow() {
            return Err(ProxyError::ShuttingDown);
        }
        self.pool_for(target)?.acquire().await
    }

    /// Hand a connection back: healthy ones return to the idle set, the
    /// rest are closed and never reused
    pub fn release(&self, conn: PooledConnection, healthy: bool) {
        if healthy {
            drop(conn);
        } else {
            let metrics = managed::Object::metrics(&conn);
            debug!(
                age_ms = metrics.age().as_millis() as u64,
                reused = metrics.recycle_count,
                "Discarding backend connection"
            );
            remove_from_pool(conn);
        }
    }

    /// Backend sockets opened since process start, across all targets
    #[must_use]
    pub fn connections_created(&self) -> u64 {
        self.total_created.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn status(&self, target: &BackendTarget) -> Option<PoolStatus> {
        self.pools.get(target).map(|pool| pool.status())
    }

    /// Drop the idle connections of `target`, e.g. after a failed probe
    pub fn clear_idle_connections(&self, target: &BackendTarget) -> usize {
        self.pools.get(target).map_or(0, |pool| pool.clear_idle())
    }

    /// Stop health checks and close every pool
    ///
    /// Idle connections close at once; checked-out ones close when released.
    pub fn graceful_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        for pool in &self.pools {
            pool.close();
        }
    }
}
