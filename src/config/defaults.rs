//! Default values for configuration fields
//!
//! Every `#[serde(default = "...")]` in [`super::types`] points here.

use std::time::Duration;

use crate::constants::{retry, timeout, wire};
use crate::types::{HostName, Port, ProxyName};

#[inline]
pub fn proxy_name() -> ProxyName {
    ProxyName::new("mongo-wire-proxy".to_string()).expect("literal is non-empty")
}

#[inline]
pub fn localhost() -> HostName {
    HostName::new("127.0.0.1".to_string()).expect("literal is a valid host")
}

#[inline]
pub fn listen_port() -> Port {
    Port::DEFAULT
}

#[inline]
pub fn backend_port() -> Port {
    Port::MONGODB
}

/// Interval between idle-connection sweeps
#[inline]
pub fn health_check_interval() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

#[inline]
pub fn connect() -> Duration {
    timeout::CONNECT
}

#[inline]
pub fn backend_io() -> Duration {
    timeout::BACKEND_IO
}

#[inline]
pub fn client_write() -> Duration {
    timeout::CLIENT_WRITE
}

#[inline]
pub fn client_handshake() -> Duration {
    timeout::CLIENT_HANDSHAKE
}

#[inline]
pub fn pool_wait() -> Duration {
    timeout::POOL_WAIT
}

#[inline]
pub fn backend_retries() -> u32 {
    retry::DEFAULT_BACKEND_RETRIES
}

#[inline]
pub fn max_message_size() -> usize {
    wire::MAX_MESSAGE_SIZE
}

/// The client-identity field drivers send in their handshake
#[inline]
pub fn strip_handshake_fields() -> Vec<String> {
    vec!["client".to_string()]
}
