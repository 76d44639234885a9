//! deadpool manager for backend connections
//!
//! [`BackendManager::create`] is the only place a backend socket is opened,
//! so it is also the only place the connections-created counters move.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use deadpool::managed;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, trace};

use super::health_check::check_tcp_alive;
use super::provider::BackendTarget;
use crate::connection_error::ConnectionError;
use crate::constants::socket::{
    KEEPALIVE_INTERVAL, KEEPALIVE_TIME, POOL_RECV_BUFFER, POOL_SEND_BUFFER,
};
use crate::stream::ConnectionStream;
use crate::tls::TlsManager;

/// Opens and recycles connections to one backend target
#[derive(Debug)]
pub struct BackendManager {
    target: BackendTarget,
    connect_timeout: Duration,
    tls: Option<TlsManager>,
    /// Sockets opened for this target
    created: AtomicU64,
    /// Sockets opened for every target, shared across managers
    total_created: Arc<AtomicU64>,
}

impl BackendManager {
    pub fn new(
        target: BackendTarget,
        connect_timeout: Duration,
        tls: Option<TlsManager>,
        total_created: Arc<AtomicU64>,
    ) -> Self {
        Self {
            target,
            connect_timeout,
            tls,
            created: AtomicU64::new(0),
            total_created,
        }
    }

    #[must_use]
    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Successful socket creations for this target
    #[must_use]
    pub fn connections_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>, ConnectionError> {
        let address = self.target.to_string();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&address)
            .await
            .map_err(|source| ConnectionError::DnsResolution {
                address: address.clone(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectionError::NoAddresses { address });
        }
        Ok(addrs)
    }

    async fn connect_tcp(&self, addr: SocketAddr) -> Result<TcpStream, ConnectionError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|source| ConnectionError::SocketConfig {
            operation: "create",
            source,
        })?;

        socket
            .set_recv_buffer_size(POOL_RECV_BUFFER)
            .and_then(|()| socket.set_send_buffer_size(POOL_SEND_BUFFER))
            .map_err(|source| ConnectionError::SocketConfig {
                operation: "buffer sizes",
                source,
            })?;
        socket
            .set_nodelay(true)
            .map_err(|source| ConnectionError::SocketConfig {
                operation: "nodelay",
                source,
            })?;

        let stream = socket
            .connect(addr)
            .await
            .map_err(|source| ConnectionError::TcpConnect {
                host: self.target.host.clone(),
                port: self.target.port,
                source,
            })?;

        let keepalive = TcpKeepalive::new()
            .with_time(KEEPALIVE_TIME)
            .with_interval(KEEPALIVE_INTERVAL);
        SockRef::from(&stream)
            .set_tcp_keepalive(&keepalive)
            .map_err(|source| ConnectionError::SocketConfig {
                operation: "keepalive",
                source,
            })?;

        Ok(stream)
    }

    async fn open(&self) -> Result<ConnectionStream, ConnectionError> {
        let mut last_error = None;
        for addr in self.resolve().await? {
            match self.connect_tcp(addr).await {
                Ok(tcp) => {
                    return match &self.tls {
                        Some(tls) => tls
                            .handshake(tcp, &self.target.host, &self.target.to_string())
                            .await
                            .map(ConnectionStream::tls),
                        None => Ok(ConnectionStream::plain(tcp)),
                    };
                }
                Err(e) => {
                    trace!(backend = %self.target, %addr, error = %e, "Address failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ConnectionError::NoAddresses {
            address: self.target.to_string(),
        }))
    }
}

impl managed::Manager for BackendManager {
    type Type = ConnectionStream;
    type Error = ConnectionError;

    async fn create(&self) -> Result<ConnectionStream, ConnectionError> {
        let stream = tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| ConnectionError::ConnectTimeout {
                backend: self.target.to_string(),
                timeout: self.connect_timeout,
            })??;

        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total_created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            backend = %self.target,
            tls = stream.is_tls(),
            created,
            total,
            "Opened backend connection"
        );
        Ok(stream)
    }

    async fn recycle(
        &self,
        conn: &mut ConnectionStream,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<ConnectionError> {
        check_tcp_alive(conn).map_err(|e| {
            debug!(backend = %self.target, error = %e, "Idle connection failed liveness check");
            e.into()
        })
    }

    fn detach(&self, _conn: &mut ConnectionStream) {
        trace!(backend = %self.target, "Connection detached from pool");
    }
}
