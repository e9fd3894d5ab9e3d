//! TLS client setup on top of rustls.

use crate::transport::BoxedIoStream;
use sn_core::NavError;
use sn_core::NavResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Controls which trust anchors are used for server certificate verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Use only the embedded Mozilla/WebPKI roots.
    #[default]
    WebPkiOnly,
    /// Use WebPKI roots and merge operating-system roots (enterprise/local CAs).
    WebPkiAndOs,
}

/// Upgrades TCP connections to TLS. The client configuration is built once.
#[derive(Debug, Clone)]
pub struct TlsConnector {
    #[cfg(feature = "tls-rustls")]
    config: Arc<ClientConfig>,
}

#[cfg(feature = "tls-rustls")]
impl TlsConnector {
    pub fn new(mode: TrustStoreMode) -> NavResult<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let roots = root_store(mode)?;
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|error| {
                NavError::new(
                    "net.tls.config_versions_invalid",
                    format!("failed to configure TLS protocol versions: {error}"),
                )
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn connect(&self, mut stream: TcpStream, host: &str) -> NavResult<BoxedIoStream> {
        use rustls::ClientConnection;
        use rustls::StreamOwned;

        let server_name = ServerName::try_from(host.to_owned()).map_err(|error| {
            NavError::new(
                "net.tls.server_name_invalid",
                format!("invalid TLS server name `{host}`: {error}"),
            )
        })?;

        let mut connection =
            ClientConnection::new(Arc::clone(&self.config), server_name).map_err(|error| {
                NavError::new(
                    "net.tls.connection_init_failed",
                    format!("failed to initialize TLS connection for `{host}`: {error}"),
                )
            })?;

        connection.complete_io(&mut stream).map_err(|error| {
            NavError::new(
                "net.tls.handshake_failed",
                format!("TLS handshake failed for `{host}`: {error}"),
            )
        })?;

        Ok(Box::new(StreamOwned::new(connection, stream)))
    }
}

#[cfg(feature = "tls-rustls")]
fn root_store(mode: TrustStoreMode) -> NavResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if matches!(mode, TrustStoreMode::WebPkiAndOs) {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(NavError::new(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "merged operating-system trust anchors");
    }

    if roots.is_empty() {
        return Err(NavError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
impl TlsConnector {
    pub fn new(_mode: TrustStoreMode) -> NavResult<Self> {
        Ok(Self {})
    }

    pub fn connect(&self, _stream: TcpStream, _host: &str) -> NavResult<BoxedIoStream> {
        Err(NavError::new(
            "net.tls.backend_unavailable",
            "rustls backend is disabled for this build; enable `sn-net/tls-rustls`",
        ))
    }
}

#[cfg(all(test, feature = "tls-rustls"))]
mod tests {
    use super::TlsConnector;
    use super::TrustStoreMode;

    #[test]
    fn builds_connector_with_embedded_roots() {
        assert!(TlsConnector::new(TrustStoreMode::WebPkiOnly).is_ok());
    }

    #[test]
    fn defaults_to_webpki_only() {
        assert_eq!(TrustStoreMode::default(), TrustStoreMode::WebPkiOnly);
    }
}
