//! Builder for [`Proxy`]
//!
//! Validates the configuration, prepares the backend TLS connector and the
//! client-facing TLS acceptor, and creates the shared connection pool.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::Proxy;
use crate::config::Config;
use crate::interceptor::{InterceptorFactory, PassThroughFactory, StripFieldsFactory};
use crate::pool::ConnectionPool;
use crate::tls::{TlsManager, load_acceptor};

/// Builder for a [`Proxy`]
///
/// Without an explicit factory the proxy strips the configured handshake
/// fields, or passes traffic through untouched when that list is empty.
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// use mongo_wire_proxy::{Proxy, PassThroughFactory};
/// use mongo_wire_proxy::config::load_config;
///
/// let config = load_config("proxy.toml")?;
/// let proxy = Proxy::builder(config)
///     .interceptor_factory(PassThroughFactory)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ProxyBuilder {
    config: Config,
    factory: Option<Arc<dyn InterceptorFactory>>,
}

impl ProxyBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            factory: None,
        }
    }

    /// Install the factory that creates each session's interceptor
    #[must_use]
    pub fn interceptor_factory(mut self, factory: impl InterceptorFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Like [`Self::interceptor_factory`] for an already shared factory
    #[must_use]
    pub fn shared_interceptor_factory(mut self, factory: Arc<dyn InterceptorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    fn default_factory(config: &Config) -> Arc<dyn InterceptorFactory> {
        let fields = &config.interceptor.strip_handshake_fields;
        if fields.is_empty() {
            Arc::new(PassThroughFactory)
        } else {
            Arc::new(StripFieldsFactory::new(fields.iter().cloned()))
        }
    }

    /// Build the proxy. Fails if the configuration is invalid or TLS
    /// material cannot be loaded.
    pub fn build(self) -> Result<Proxy> {
        let config = self.config;
        config.validate()?;

        let backend_tls = config
            .backend
            .use_tls
            .then(|| TlsManager::new(config.backend.tls_config()))
            .transpose()
            .context("Failed to initialize backend TLS")?;

        let acceptor = config
            .listen
            .tls
            .as_ref()
            .map(|tls| {
                load_acceptor(&tls.cert_path, &tls.key_path).with_context(|| {
                    format!(
                        "Failed to load listener TLS material ({}, {})",
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })
            })
            .transpose()?;

        let mut pool_settings = config.pool_settings();
        pool_settings.tls = backend_tls;
        let pool = Arc::new(ConnectionPool::new(pool_settings));

        let factory = self
            .factory
            .unwrap_or_else(|| Self::default_factory(&config));

        let target = config.backend.target();
        info!(
            name = %config.name,
            backend = %target,
            backend_tls = config.backend.use_tls,
            client_tls = acceptor.is_some(),
            max_connections = config.backend.max_connections.get(),
            "Proxy configured"
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Proxy {
            name: Arc::from(config.name.as_str()),
            session_settings: config.session_settings(),
            config: Arc::new(config),
            pool,
            target,
            factory,
            acceptor,
            sessions: Arc::default(),
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }
}
