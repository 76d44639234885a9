//! TLS for backend connections and the client-facing listener
//!
//! Backend side: a [`TlsManager`] loads trust roots once (custom CA, then the
//! system store, then the Mozilla bundle) and caches the connector.
//! Client side: [`load_acceptor`] builds the listener's acceptor from PEM
//! files when the proxy is constructed, so a bad certificate fails startup
//! rather than the first handshake.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, ServerConfig,
    SignatureScheme,
};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, client::TlsStream};
use tracing::{debug, warn};

use crate::connection_error::ConnectionError;

/// Backend TLS settings
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub use_tls: bool,
    /// Skip certificate verification (testing and private networks only)
    pub skip_verify: bool,
    /// Extra CA bundle to trust
    pub ca_path: Option<PathBuf>,
}

#[derive(Debug)]
struct CertificateLoadResult {
    root_store: RootCertStore,
    sources: Vec<&'static str>,
}

/// Accepts every server certificate
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Backend TLS connector with trust roots loaded once
#[derive(Clone)]
pub struct TlsManager {
    config: TlsConfig,
    connector: Arc<TlsConnector>,
}

impl std::fmt::Debug for TlsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsManager")
            .field("config", &self.config)
            .field("connector", &"<TlsConnector>")
            .finish()
    }
}

impl TlsManager {
    pub fn new(config: TlsConfig) -> anyhow::Result<Self> {
        let loaded = load_certificates(&config)?;
        let client_config = client_config(loaded.root_store, &config)?;

        debug!(
            sources = %loaded.sources.join(", "),
            "TLS: backend trust roots loaded"
        );

        Ok(Self {
            config,
            connector: Arc::new(TlsConnector::from(Arc::new(client_config))),
        })
    }

    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Wrap a connected socket in TLS
    pub async fn handshake(
        &self,
        stream: TcpStream,
        hostname: &str,
        backend: &str,
    ) -> Result<TlsStream<TcpStream>, ConnectionError> {
        let domain = ServerName::try_from(hostname.to_string()).map_err(|_| {
            ConnectionError::InvalidServerName {
                backend: backend.to_string(),
                hostname: hostname.to_string(),
            }
        })?;

        self.connector
            .connect(domain, stream)
            .await
            .map_err(|e| ConnectionError::TlsHandshake {
                backend: backend.to_string(),
                source: Box::new(e),
            })
    }
}

fn load_certificates(config: &TlsConfig) -> anyhow::Result<CertificateLoadResult> {
    let mut root_store = RootCertStore::empty();
    let mut sources = Vec::new();

    if let Some(path) = &config.ca_path {
        for cert in read_certs(path)? {
            root_store
                .add(cert)
                .context("Failed to add custom CA certificate")?;
        }
        sources.push("custom CA");
    }

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!("TLS: certificate loading error: {}", error);
    }
    let (added, _ignored) = root_store.add_parsable_certificates(native.certs);
    if added > 0 {
        sources.push("system certificates");
    }

    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        sources.push("Mozilla CA bundle");
    }

    Ok(CertificateLoadResult {
        root_store,
        sources,
    })
}

fn client_config(root_store: RootCertStore, config: &TlsConfig) -> anyhow::Result<ClientConfig> {
    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .context("Failed to create TLS config with ring provider")?;

    let mut client_config = if config.skip_verify {
        warn!("TLS: backend certificate verification DISABLED");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    client_config.resumption = rustls::client::Resumption::default();
    Ok(client_config)
}

fn read_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read certificate from {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", path.display()))?;
    anyhow::ensure!(!certs.is_empty(), "No certificates found in {}", path.display());
    Ok(certs)
}

fn read_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read private key from {}", path.display()))?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .with_context(|| format!("Failed to parse private key {}", path.display()))?
        .with_context(|| format!("No private key found in {}", path.display()))
}

/// Build the listener's TLS acceptor from a PEM certificate chain and key
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> anyhow::Result<TlsAcceptor> {
    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;

    let server_config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .context("Failed to create TLS config with ring provider")?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("Certificate and private key do not match")?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TlsConfig::default();
        assert!(!config.use_tls);
        assert!(!config.skip_verify);
        assert!(config.ca_path.is_none());
    }

    #[test]
    fn test_certificate_loading_has_roots() {
        let loaded = load_certificates(&TlsConfig::default()).unwrap();
        assert!(!loaded.root_store.is_empty());
        assert!(!loaded.sources.is_empty());
    }

    #[test]
    fn test_manager_with_skip_verify() {
        let manager = TlsManager::new(TlsConfig {
            use_tls: true,
            skip_verify: true,
            ca_path: None,
        })
        .unwrap();
        assert!(manager.config().skip_verify);
    }

    #[test]
    fn test_missing_ca_file_fails() {
        let err = TlsManager::new(TlsConfig {
            use_tls: true,
            skip_verify: false,
            ca_path: Some(PathBuf::from("/nonexistent/ca.pem")),
        })
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn test_acceptor_rejects_empty_pem() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();

        let err = load_acceptor(cert.path(), key.path()).err().unwrap();
        assert!(err.to_string().contains("No certificates found"));
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let manager = TlsManager::new(TlsConfig {
            use_tls: true,
            skip_verify: true,
            ca_path: None,
        })
        .unwrap();

        let err = manager
            .handshake(stream, "not a hostname!", "primary")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidServerName { .. }));
    }
}
