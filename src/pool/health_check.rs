//! Liveness checks for idle pooled connections
//!
//! An idle backend connection must have nothing to read: the proxy never
//! leaves a reply unread. A non-blocking read tells the three cases apart:
//! `WouldBlock` means healthy, `Ok(0)` means the peer closed, and any data
//! or other error means the connection cannot be reused.

use std::time::Duration;

use deadpool::managed;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use super::manager::BackendManager;
use crate::connection_error::ConnectionError;
use crate::constants::pool::TCP_PEEK_BUFFER_SIZE;
use crate::stream::ConnectionStream;

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("TCP connection closed")]
    TcpClosed,

    #[error("Unexpected data on idle connection")]
    UnexpectedData,

    #[error("TCP error: {0}")]
    TcpError(#[source] std::io::Error),
}

impl From<HealthCheckError> for managed::RecycleError<ConnectionError> {
    fn from(err: HealthCheckError) -> Self {
        managed::RecycleError::Message(err.to_string().into())
    }
}

/// Non-blocking check of the socket under `conn`
///
/// For TLS the raw socket is inspected: pending records on an idle
/// connection are just as unexpected as pending plaintext.
pub fn check_tcp_alive(conn: &ConnectionStream) -> Result<(), HealthCheckError> {
    let mut peek_buf = [0u8; TCP_PEEK_BUFFER_SIZE];
    match conn.tcp_stream().try_read(&mut peek_buf) {
        Ok(0) => Err(HealthCheckError::TcpClosed),
        Ok(_) => Err(HealthCheckError::UnexpectedData),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(HealthCheckError::TcpError(e)),
    }
}

/// Periodically drop idle connections that fail [`check_tcp_alive`]
///
/// Only idle connections are visited, so a connection a session is using is
/// never touched.
pub async fn run_periodic_health_checks(
    pool: managed::Pool<BackendManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let backend = pool.manager().target().to_string();
    info!(
        backend = %backend,
        interval_secs = interval.as_secs(),
        "Starting periodic health checks"
    );

    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }

        let result = pool.retain(|conn, _metrics| check_tcp_alive(conn).is_ok());
        if !result.removed.is_empty() {
            debug!(
                backend = %backend,
                removed = result.removed.len(),
                retained = result.retained,
                "Health check dropped dead idle connections"
            );
        }
    }

    info!(backend = %backend, "Periodic health check task terminated");
}
