//! Command-line arguments
//!
//! Listen and backend flags override the config file, which in turn has
//! already applied its `MONGO_PROXY_*` environment overrides.

use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;
use crate::types::{HostName, Port, ThreadCount};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path; a default one is written if it is missing
    #[arg(short, long, default_value = "proxy.toml", env = "MONGO_PROXY_CONFIG")]
    pub config: PathBuf,

    /// Host to listen on (overrides config file)
    #[arg(long, value_parser = parse_host)]
    pub host: Option<HostName>,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    pub port: Option<Port>,

    /// Backend host (overrides config file)
    #[arg(long, value_parser = parse_host)]
    pub backend_host: Option<HostName>,

    /// Backend port (overrides config file)
    #[arg(long)]
    pub backend_port: Option<Port>,

    /// Worker threads (default: 1, use 0 for one per CPU core)
    #[arg(short, long, env = "MONGO_PROXY_THREADS")]
    pub threads: Option<ThreadCount>,

    /// Also write plain-text logs to this file
    #[arg(long, env = "MONGO_PROXY_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

fn parse_host(s: &str) -> Result<HostName, String> {
    HostName::new(s.to_string()).map_err(|e| e.to_string())
}

impl Args {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.listen.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(host) = &self.backend_host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["mongo-wire-proxy"]).unwrap();
        assert_eq!(args.config, PathBuf::from("proxy.toml"));
        assert!(args.port.is_none());
        assert!(args.threads.is_none());
    }

    #[test]
    fn test_overrides_apply() {
        let args = Args::try_parse_from([
            "mongo-wire-proxy",
            "--host",
            "0.0.0.0",
            "--port",
            "27100",
            "--backend-host",
            "db.internal",
            "--backend-port",
            "27019",
            "--threads",
            "4",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply_to(&mut config);
        assert_eq!(config.listen.host.as_str(), "0.0.0.0");
        assert_eq!(config.listen.port.get(), 27100);
        assert_eq!(config.backend.target().to_string(), "db.internal:27019");
        assert_eq!(args.threads.unwrap().get(), 4);
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Args::try_parse_from(["mongo-wire-proxy", "--port", "0"]).is_err());
        assert!(Args::try_parse_from(["mongo-wire-proxy", "--backend-host", " "]).is_err());
    }
}
