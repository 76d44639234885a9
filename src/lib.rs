//! A transparent MongoDB wire-protocol proxy
//!
//! Clients connect to the proxy as if it were a `mongod`. Each connection
//! becomes a [`ProxySession`] that decodes one message at a time, hands it
//! to a pluggable [`ProxyInterceptor`], forwards it over a pooled backend
//! connection and writes the reply back. Backend failures are retried on a
//! fresh connection and, if they persist, answered with a server-style error
//! document instead of dropping the client.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use mongo_wire_proxy::{Proxy, config::load_config};
//!
//! let proxy = Proxy::new(load_config("proxy.toml")?)?;
//! let listener = proxy.bind().await?;
//! proxy.run(listener).await
//! # }
//! ```

pub mod args;
pub mod config;
pub mod connection_error;
pub mod constants;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod mongo_error;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod tls;
pub mod types;

pub use config::{Config, create_default_config, load_config, load_config_or_create};
pub use error::ProxyError;
pub use interceptor::{
    Interception, InterceptorError, InterceptorFactory, PassThroughFactory, ProxyInterceptor,
    ResponseInterceptor, SessionInfo, StripFieldsFactory,
};
pub use mongo_error::MongoError;
pub use pool::{BackendTarget, ConnectionPool};
pub use protocol::{Message, MessageHeader, OpCode};
pub use proxy::{Proxy, ProxyBuilder};
pub use session::{ProxySession, SessionEnd, SessionSettings, SessionState};
