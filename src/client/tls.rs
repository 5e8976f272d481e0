//! TLS client configuration
//!
//! Loads CA and client certificates from PEM files and builds the
//! connector used for `mqtts` connections.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::config::TlsOptions;

/// Error type for TLS configuration
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading files
    Io(std::io::Error),
    /// Certificate parsing error
    CertificateError(String),
    /// Private key error
    PrivateKeyError(String),
    /// TLS configuration error
    ConfigError(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "IO error: {}", e),
            TlsError::CertificateError(msg) => write!(f, "Certificate error: {}", msg),
            TlsError::PrivateKeyError(msg) => write!(f, "Private key error: {}", msg),
            TlsError::ConfigError(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(e: std::io::Error) -> Self {
        TlsError::Io(e)
    }
}

/// Load certificates from a PEM file
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_reader_iter(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateError(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(TlsError::CertificateError(format!(
            "No certificates found in {}",
            path
        )));
    }

    Ok(certs)
}

/// Load private key from a PEM file
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    PrivateKeyDer::from_pem_reader(reader)
        .map_err(|e| TlsError::PrivateKeyError(format!("Failed to parse private key: {}", e)))
}

/// Load CA certificates into a root store
fn load_ca_certs(path: &str) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(path)? {
        root_store.add(cert).map_err(|e| {
            TlsError::CertificateError(format!("Failed to add CA certificate: {}", e))
        })?;
    }
    Ok(root_store)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(crypto::aws_lc_rs::default_provider()))
}

/// Accepts any server certificate while still checking handshake signatures
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Build a TLS connector and the name to present for `host`
pub fn load_tls_connector(
    options: &TlsOptions,
    host: &str,
) -> Result<(TlsConnector, ServerName<'static>), TlsError> {
    let builder = ClientConfig::builder();
    let builder = if options.verifies_server() {
        let ca_path = options.ca_cert.as_deref().unwrap_or_default();
        builder.with_root_certificates(load_ca_certs(ca_path)?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(
                crypto_provider(),
            )))
    };

    let client_config = match (&options.cert, &options.key) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)
            .map_err(|e| TlsError::ConfigError(format!("Failed to build TLS config: {}", e)))?,
        (Some(_), None) => {
            return Err(TlsError::ConfigError(
                "tls_key is required when tls_cert is set".to_string(),
            ))
        }
        (None, Some(_)) => {
            return Err(TlsError::ConfigError(
                "tls_cert is required when tls_key is set".to_string(),
            ))
        }
        (None, None) => builder.with_no_client_auth(),
    };

    let name = options.server_name.as_deref().unwrap_or(host).to_string();
    let server_name = ServerName::try_from(name.clone())
        .map_err(|_| TlsError::ConfigError(format!("Invalid server name: {}", name)))?;

    Ok((TlsConnector::from(Arc::new(client_config)), server_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_error_display() {
        let err = TlsError::CertificateError("test error".to_string());
        assert_eq!(err.to_string(), "Certificate error: test error");
    }

    #[test]
    fn test_load_certs_missing_file() {
        assert!(matches!(
            load_certs("/nonexistent/ca.pem"),
            Err(TlsError::Io(_))
        ));
    }

    #[test]
    fn test_load_certs_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert!(matches!(
            load_certs(path),
            Err(TlsError::CertificateError(_))
        ));
    }

    #[test]
    fn test_connector_without_verification() {
        let options = TlsOptions {
            ca_cert: Some("*".to_string()),
            ..Default::default()
        };
        let (_, name) = load_tls_connector(&options, "broker.lan").unwrap();
        assert!(matches!(name, ServerName::DnsName(ref n) if n.as_ref() == "broker.lan"));
    }

    #[test]
    fn test_connector_server_name_override() {
        let options = TlsOptions {
            ca_cert: Some("*".to_string()),
            server_name: Some("mqtt.example.com".to_string()),
            ..Default::default()
        };
        let (_, name) = load_tls_connector(&options, "10.0.0.2").unwrap();
        assert!(matches!(name, ServerName::DnsName(ref n) if n.as_ref() == "mqtt.example.com"));
    }

    #[test]
    fn test_connector_ip_address_host() {
        let options = TlsOptions {
            ca_cert: Some("*".to_string()),
            ..Default::default()
        };
        let (_, name) = load_tls_connector(&options, "192.168.1.10").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_connector_cert_without_key() {
        let options = TlsOptions {
            ca_cert: Some("*".to_string()),
            cert: Some("client.pem".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            load_tls_connector(&options, "broker"),
            Err(TlsError::ConfigError(_))
        ));
    }

    #[test]
    fn test_connector_missing_ca_file() {
        let options = TlsOptions {
            ca_cert: Some("/nonexistent/ca.pem".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            load_tls_connector(&options, "broker"),
            Err(TlsError::Io(_))
        ));
    }
}
