//! Configuration loading from files and environment variables
//!
//! Environment variables win over the file so container deployments can
//! repoint the proxy without editing it:
//! - `MONGO_PROXY_LISTEN_HOST`, `MONGO_PROXY_LISTEN_PORT`
//! - `MONGO_PROXY_BACKEND_HOST`, `MONGO_PROXY_BACKEND_PORT`

use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;

use super::types::Config;
use crate::types::HostName;

const LISTEN_HOST: &str = "MONGO_PROXY_LISTEN_HOST";
const LISTEN_PORT: &str = "MONGO_PROXY_LISTEN_PORT";
const BACKEND_HOST: &str = "MONGO_PROXY_BACKEND_HOST";
const BACKEND_PORT: &str = "MONGO_PROXY_BACKEND_PORT";

fn env_override<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(host) = env_override::<String>(LISTEN_HOST)? {
        config.listen.host = HostName::new(host).context(LISTEN_HOST)?;
    }
    if let Some(port) = env_override(LISTEN_PORT)? {
        config.listen.port = port;
    }
    if let Some(host) = env_override::<String>(BACKEND_HOST)? {
        config.backend.host = HostName::new(host).context(BACKEND_HOST)?;
    }
    if let Some(port) = env_override(BACKEND_PORT)? {
        config.backend.port = port;
    }
    Ok(())
}

/// Load configuration from a TOML file, with environment variable overrides
pub fn load_config(config_path: impl AsRef<Path>) -> Result<Config> {
    let path = config_path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;

    apply_env_overrides(&mut config)?;
    config.validate()?;

    Ok(config)
}

/// Load `config_path`, writing a default file there first if it is missing
pub fn load_config_or_create(config_path: impl AsRef<Path>) -> Result<Config> {
    let path = config_path.as_ref();
    if !path.exists() {
        let default = create_default_config();
        let text = toml::to_string_pretty(&default).context("Failed to render default config")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write default config '{}'", path.display()))?;
        tracing::info!("Created default config file at {}", path.display());
    }
    load_config(path)
}

/// Configuration for a proxy on the default port in front of a local mongod
#[must_use]
pub fn create_default_config() -> Config {
    Config::default()
}
