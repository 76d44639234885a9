//! Backend connection pooling
//!
//! - [`manager`]: opens, TLS-wraps and recycles backend sockets (deadpool `Manager`)
//! - [`provider`]: per-target pools and the process-wide registry
//! - [`health_check`]: liveness checks for idle connections
//! - [`connection_guard`]: discarding broken connections

pub mod connection_guard;
pub mod health_check;
pub mod manager;
pub mod provider;

pub use connection_guard::{is_connection_error, remove_from_pool};
pub use health_check::{HealthCheckError, check_tcp_alive};
pub use manager::BackendManager;
pub use provider::{
    BackendPool, BackendTarget, ConnectionPool, PoolSettings, PoolStatus, PooledConnection,
};
