//! Backend connection error types
//!
//! Errors raised while opening, securing or health-checking a pooled backend
//! connection. They surface to sessions as `BackendUnavailable`.

use std::fmt;
use std::time::Duration;

/// Errors that can occur while managing backend connections
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    /// TCP connection failed
    TcpConnect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// DNS resolution failed
    DnsResolution {
        address: String,
        source: std::io::Error,
    },

    /// DNS resolution succeeded but returned nothing
    NoAddresses { address: String },

    /// Socket configuration failed (buffer sizes, keepalive, etc.)
    SocketConfig {
        operation: &'static str,
        source: std::io::Error,
    },

    /// Connect plus handshake did not finish in time
    ConnectTimeout { backend: String, timeout: Duration },

    /// TLS handshake failed
    TlsHandshake {
        backend: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Hostname cannot be used as a TLS server name
    InvalidServerName { backend: String, hostname: String },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpConnect { host, port, source } => {
                write!(f, "Failed to connect to {}:{}: {}", host, port, source)
            }
            Self::DnsResolution { address, source } => {
                write!(f, "Failed to resolve DNS for {}: {}", address, source)
            }
            Self::NoAddresses { address } => write!(f, "No addresses found for {}", address),
            Self::SocketConfig { operation, source } => {
                write!(f, "Failed to configure socket ({}): {}", operation, source)
            }
            Self::ConnectTimeout { backend, timeout } => {
                write!(
                    f,
                    "Connecting to backend '{}' timed out after {:?}",
                    backend, timeout
                )
            }
            Self::TlsHandshake { backend, source } => {
                write!(
                    f,
                    "TLS handshake failed for backend '{}': {}",
                    backend, source
                )
            }
            Self::InvalidServerName { backend, hostname } => {
                write!(
                    f,
                    "Invalid TLS server name '{}' for backend '{}'",
                    hostname, backend
                )
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TcpConnect { source, .. } => Some(source),
            Self::DnsResolution { source, .. } => Some(source),
            Self::SocketConfig { source, .. } => Some(source),
            Self::TlsHandshake { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl ConnectionError {
    /// Check if the failure was a deadline rather than a refusal
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectTimeout { .. } => true,
            Self::TcpConnect { source, .. } => source.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Get the appropriate log level for this error
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // Misconfiguration needs attention
            Self::TlsHandshake { .. } | Self::InvalidServerName { .. } => tracing::Level::ERROR,
            _ => tracing::Level::WARN,
        }
    }
}
