//! Configuration files, defaults and environment overrides

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use mongo_wire_proxy::config::{create_default_config, load_config, load_config_or_create};
use mongo_wire_proxy::types::Port;

/// Environment variables are process-wide; tests touching them take turns
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_empty_file_yields_defaults() {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config("");
    let config = load_config(file.path()).unwrap();

    assert_eq!(config, create_default_config());
    assert_eq!(config.listen.port.get(), 27018);
    assert_eq!(config.backend.port, Port::MONGODB);
    assert_eq!(config.backend.max_connections.get(), 100);
    assert_eq!(config.session.backend_retries, 1);
    assert!(!config.session.close_client_on_backend_failure);
    assert_eq!(config.interceptor.strip_handshake_fields, vec!["client"]);
    assert_eq!(config.timeouts.client_idle_secs, None);
}

#[test]
fn test_full_file() {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config(
        r#"
name = "edge-proxy"

[listen]
host = "0.0.0.0"
port = 28000

[backend]
host = "db.internal"
port = 27019
max_connections = 8
health_check_interval = 60

[timeouts]
connect_secs = 3
backend_io_secs = 20
client_write_secs = 4
client_handshake_secs = 7
client_idle_secs = 600
pool_wait_ms = 250

[session]
backend_retries = 2
close_client_on_backend_failure = true

[interceptor]
strip_handshake_fields = ["client", "saslSupportedMechs"]
"#,
    );
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.name.as_str(), "edge-proxy");
    assert_eq!(config.listen.host.as_str(), "0.0.0.0");
    assert_eq!(config.listen.port.get(), 28000);
    assert_eq!(config.backend.host.as_str(), "db.internal");
    assert_eq!(config.backend.max_connections.get(), 8);
    assert_eq!(config.backend.health_check_interval, Some(Duration::from_secs(60)));
    assert_eq!(config.timeouts.backend_io_secs, Duration::from_secs(20));
    assert_eq!(config.timeouts.client_handshake_secs, Duration::from_secs(7));
    assert_eq!(config.timeouts.client_idle_secs, Some(Duration::from_secs(600)));
    assert_eq!(config.timeouts.pool_wait_ms, Duration::from_millis(250));
    assert_eq!(config.session.backend_retries, 2);
    assert!(config.session.close_client_on_backend_failure);
    assert_eq!(config.interceptor.strip_handshake_fields.len(), 2);

    let settings = config.session_settings();
    assert_eq!(settings.backend_retries, 2);
    assert_eq!(settings.client_idle_timeout, Some(Duration::from_secs(600)));
    assert_eq!(config.backend.target().to_string(), "db.internal:27019");
}

#[test]
fn test_invalid_values_rejected() {
    let _env = ENV_LOCK.lock().unwrap();
    let cases = [
        "[listen]\nport = 0",
        "[backend]\nhost = \"\"",
        "[backend]\nmax_connections = 0",
        "[backend]\ntls_skip_verify = true",
        "[timeouts]\nbackend_io_secs = 0",
        "[timeouts]\nclient_handshake_secs = 0",
        "[session]\nmax_message_size = 8",
        "[interceptor]\nstrip_handshake_fields = [\"\"]",
    ];
    for text in cases {
        let file = write_config(text);
        assert!(load_config(file.path()).is_err(), "accepted: {text}");
    }
}

#[test]
fn test_env_overrides_win_over_file() {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config("[backend]\nhost = \"from-file\"\nport = 27020");

    // SAFETY: ENV_LOCK serializes every test in this binary that reads the environment
    unsafe {
        std::env::set_var("MONGO_PROXY_BACKEND_HOST", "from-env");
        std::env::set_var("MONGO_PROXY_LISTEN_PORT", "29000");
    }
    let config = load_config(file.path());
    unsafe {
        std::env::remove_var("MONGO_PROXY_BACKEND_HOST");
        std::env::remove_var("MONGO_PROXY_LISTEN_PORT");
    }
    let config = config.unwrap();

    assert_eq!(config.backend.host.as_str(), "from-env");
    assert_eq!(config.backend.port.get(), 27020);
    assert_eq!(config.listen.port.get(), 29000);
}

#[test]
fn test_invalid_env_override_is_an_error() {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config("");

    // SAFETY: see test_env_overrides_win_over_file
    unsafe { std::env::set_var("MONGO_PROXY_BACKEND_PORT", "not-a-port") };
    let result = load_config(file.path());
    unsafe { std::env::remove_var("MONGO_PROXY_BACKEND_PORT") };

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("MONGO_PROXY_BACKEND_PORT"));
}

#[test]
fn test_created_default_file_round_trips() {
    let _env = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.toml");

    let created = load_config_or_create(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[backend]"));

    let reloaded = load_config(&path).unwrap();
    assert_eq!(created, reloaded);
}
