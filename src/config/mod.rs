//! Configuration module
//!
//! Types, defaults, loading and validation for the proxy's TOML
//! configuration file.

mod defaults;
mod loading;
mod types;
mod validation;

pub use loading::{create_default_config, load_config, load_config_or_create};
pub use types::{
    BackendConfig, Config, InterceptorConfig, ListenConfig, ListenTlsConfig, SessionConfig,
    TimeoutConfig,
};

pub use defaults::{health_check_interval, strip_handshake_fields};
