//! The proxy: listener loop, session spawning and shutdown
//!
//! A [`Proxy`] owns the shared pieces every session needs (connection pool,
//! interceptor factory, TLS acceptor, shutdown signal) and spawns one
//! [`ProxySession`] task per accepted client.

mod builder;

pub use builder::ProxyBuilder;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::timeout;
use crate::error::ProxyError;
use crate::interceptor::{InterceptorFactory, SessionInfo};
use crate::pool::{BackendTarget, ConnectionPool};
use crate::session::{ProxySession, SessionEnd, SessionSettings};
use crate::stream::ConnectionStream;

/// Removes a session from the registry when its task finishes
struct SessionRegistration {
    sessions: Arc<DashMap<Uuid, SocketAddr>>,
    id: Uuid,
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct Proxy {
    config: Arc<Config>,
    name: Arc<str>,
    session_settings: SessionSettings,
    pool: Arc<ConnectionPool>,
    target: BackendTarget,
    factory: Arc<dyn InterceptorFactory>,
    acceptor: Option<TlsAcceptor>,
    /// Live sessions and their client addresses
    sessions: Arc<DashMap<Uuid, SocketAddr>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("client_tls", &self.acceptor.is_some())
            .field("active_sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl Proxy {
    #[must_use]
    pub fn builder(config: Config) -> ProxyBuilder {
        ProxyBuilder::new(config)
    }

    /// Build with the default interceptor policy
    pub fn new(config: Config) -> Result<Self> {
        ProxyBuilder::new(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Backend connections opened since the proxy was built
    #[must_use]
    pub fn connections_created(&self) -> u64 {
        self.pool.connections_created()
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.listen.host, self.config.listen.port);
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))
    }

    /// Accept clients until shutdown is signalled
    ///
    /// Each client is served on its own task. Returns once the listener has
    /// stopped; sessions already running keep going until they observe the
    /// shutdown signal themselves.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if let Ok(addr) = listener.local_addr() {
            info!(name = %self.name, listen = %addr, backend = %self.target, "Proxy listening");
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let proxy = self.clone();
                        tokio::spawn(async move {
                            // Session outcomes are logged by the session itself
                            let _ = proxy.handle_client(stream, addr).await;
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }

        info!(name = %self.name, "Listener stopped");
        Ok(())
    }

    /// Serve one accepted client to completion
    pub async fn handle_client(
        &self,
        stream: TcpStream,
        client_addr: SocketAddr,
    ) -> Result<SessionEnd, ProxyError> {
        if self.is_shutting_down() {
            return Err(ProxyError::ShuttingDown);
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = %client_addr, "Failed to set TCP_NODELAY: {}", e);
        }

        let info = SessionInfo {
            id: Uuid::new_v4(),
            client_addr,
            proxy_name: Arc::clone(&self.name),
        };

        self.sessions.insert(info.id, client_addr);
        let _registration = SessionRegistration {
            sessions: Arc::clone(&self.sessions),
            id: info.id,
        };

        let client = match &self.acceptor {
            Some(acceptor) => self.accept_tls(acceptor, stream, client_addr).await?,
            None => ConnectionStream::plain(stream),
        };

        let interceptor = self.factory.new_interceptor(&info).map_err(|e| {
            warn!(session = %info.id, client = %client_addr, "Interceptor setup failed: {:#}", e);
            ProxyError::InterceptorSetup(format!("{e:#}"))
        })?;

        ProxySession::new(
            info,
            client,
            Arc::clone(&self.pool),
            self.target.clone(),
            interceptor,
            self.session_settings.clone(),
            self.shutdown_tx.subscribe(),
        )
        .run()
        .await
    }

    /// Client TLS handshake, bounded by the handshake deadline and shutdown
    async fn accept_tls(
        &self,
        acceptor: &TlsAcceptor,
        stream: TcpStream,
        client_addr: SocketAddr,
    ) -> Result<ConnectionStream, ProxyError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        let limit = self.config.timeouts.client_handshake_secs;
        let handshake = tokio::time::timeout(limit, acceptor.accept(stream));

        let result = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => return Err(ProxyError::ShuttingDown),
            result = handshake => result,
        };
        let source = match result {
            Ok(Ok(tls)) => return Ok(ConnectionStream::server_tls(tls)),
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "client TLS handshake timed out"),
        };
        debug!(client = %client_addr, "Client TLS handshake failed: {}", source);
        Err(ProxyError::ClientIo(source))
    }

    /// Signal the listener and every session to stop
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!(name = %self.name, sessions = self.active_sessions(), "Shutdown signalled");
        }
    }

    /// Stop accepting, wait for sessions to close, then close the pool
    ///
    /// Sessions close at their next suspension point. Any still running
    /// after the drain deadline keep their connections until they finish.
    pub async fn graceful_shutdown(&self) {
        self.shutdown();

        let drained = tokio::time::timeout(timeout::SHUTDOWN_DRAIN, async {
            while self.active_sessions() > 0 {
                tokio::time::sleep(timeout::SHUTDOWN_POLL).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.active_sessions(),
                "Sessions still open after shutdown drain"
            );
        }

        self.pool.graceful_shutdown();
        info!(
            name = %self.name,
            connections_created = self.connections_created(),
            "Proxy shut down"
        );
    }
}
