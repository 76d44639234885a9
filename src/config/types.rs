//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults;
use crate::pool::{BackendTarget, PoolSettings};
use crate::session::SessionSettings;
use crate::tls::TlsConfig;
use crate::types::{
    HostName, MaxConnections, Port, ProxyName, duration_serde, millis_serde,
    option_duration_serde,
};

/// Main proxy configuration
///
/// Immutable once the proxy is built; every section has defaults so a file
/// only needs the values it changes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Display name reported to interceptors and in logs
    #[serde(default = "defaults::proxy_name")]
    pub name: ProxyName,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub interceptor: InterceptorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: defaults::proxy_name(),
            listen: ListenConfig::default(),
            backend: BackendConfig::default(),
            timeouts: TimeoutConfig::default(),
            session: SessionConfig::default(),
            interceptor: InterceptorConfig::default(),
        }
    }
}

/// Client-facing listener
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ListenConfig {
    #[serde(default = "defaults::localhost")]
    pub host: HostName,
    #[serde(default = "defaults::listen_port")]
    pub port: Port,
    /// Terminate TLS from clients with this certificate and key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ListenTlsConfig>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: defaults::localhost(),
            port: defaults::listen_port(),
            tls: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ListenTlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key (PKCS#8, PKCS#1 or SEC1)
    pub key_path: PathBuf,
}

/// The single backend every session forwards to
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "defaults::localhost")]
    pub host: HostName,
    #[serde(default = "defaults::backend_port")]
    pub port: Port,
    #[serde(default)]
    pub use_tls: bool,
    /// Accept any backend certificate. Never enable outside test setups.
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// Extra CA bundle to trust on top of the system store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_path: Option<PathBuf>,
    #[serde(default)]
    pub max_connections: MaxConnections,
    /// Seconds between idle-connection sweeps; absent disables them
    #[serde(
        default = "defaults::health_check_interval",
        with = "option_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check_interval: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: defaults::localhost(),
            port: defaults::backend_port(),
            use_tls: false,
            tls_skip_verify: false,
            tls_ca_path: None,
            max_connections: MaxConnections::default(),
            health_check_interval: defaults::health_check_interval(),
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn target(&self) -> BackendTarget {
        BackendTarget::new(self.host.as_str(), self.port.get())
    }

    #[must_use]
    pub fn tls_config(&self) -> TlsConfig {
        TlsConfig {
            use_tls: self.use_tls,
            skip_verify: self.tls_skip_verify,
            ca_path: self.tls_ca_path.clone(),
        }
    }
}

/// Deadlines for every blocking operation
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Backend connect plus TLS handshake
    #[serde(default = "defaults::connect", with = "duration_serde")]
    pub connect_secs: Duration,
    /// One backend write or one reply read
    #[serde(default = "defaults::backend_io", with = "duration_serde")]
    pub backend_io_secs: Duration,
    #[serde(default = "defaults::client_write", with = "duration_serde")]
    pub client_write_secs: Duration,
    /// Client TLS handshake, only used with `[listen.tls]`
    #[serde(default = "defaults::client_handshake", with = "duration_serde")]
    pub client_handshake_secs: Duration,
    /// Close clients idle for this long; absent keeps them forever
    #[serde(
        default,
        with = "option_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_idle_secs: Option<Duration>,
    /// Wait for a free pool slot
    #[serde(default = "defaults::pool_wait", with = "millis_serde")]
    pub pool_wait_ms: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect(),
            backend_io_secs: defaults::backend_io(),
            client_write_secs: defaults::client_write(),
            client_handshake_secs: defaults::client_handshake(),
            client_idle_secs: None,
            pool_wait_ms: defaults::pool_wait(),
        }
    }
}

/// Per-session failure policy and limits
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Extra attempts after a backend failure within one request
    #[serde(default = "defaults::backend_retries")]
    pub backend_retries: u32,
    /// Drop the client when a request still fails after all retries,
    /// instead of answering with an error reply
    #[serde(default)]
    pub close_client_on_backend_failure: bool,
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_retries: defaults::backend_retries(),
            close_client_on_backend_failure: false,
            max_message_size: defaults::max_message_size(),
        }
    }
}

/// Built-in interceptor policy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// Top-level fields removed from handshake commands; empty forwards
    /// everything untouched
    #[serde(default = "defaults::strip_handshake_fields")]
    pub strip_handshake_fields: Vec<String>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            strip_handshake_fields: defaults::strip_handshake_fields(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            backend_retries: self.session.backend_retries,
            close_client_on_backend_failure: self.session.close_client_on_backend_failure,
            max_message_size: self.session.max_message_size,
            backend_io_timeout: self.timeouts.backend_io_secs,
            client_write_timeout: self.timeouts.client_write_secs,
            client_idle_timeout: self.timeouts.client_idle_secs,
        }
    }

    /// Pool settings; `tls` is filled in by the caller once the connector is built
    #[must_use]
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.backend.max_connections.get(),
            connect_timeout: self.timeouts.connect_secs,
            wait_timeout: self.timeouts.pool_wait_ms,
            health_check_interval: self.backend.health_check_interval,
            tls: None,
        }
    }
}
