//! Validated value types shared by configuration and runtime code

pub mod config;
pub mod validated;

pub use config::{
    MaxConnections, Port, ThreadCount, duration_serde, millis_serde, option_duration_serde,
};
pub use validated::{HostName, ProxyName, ValidationError};
