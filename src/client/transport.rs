//! Transport Layer
//!
//! Opens TCP or TLS connections to the broker behind a single boxed
//! stream type.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use super::tls::load_tls_connector;
use crate::config::{ConfigError, OutputConfig};

/// Time allowed for TCP connect plus TLS handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A bidirectional byte stream to the broker
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Reusable connection factory for one broker address
#[derive(Clone)]
pub struct Connector {
    host: String,
    port: u16,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Connector {
    /// Plain TCP connector
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Build a connector from output settings, loading TLS material
    pub fn from_config(config: &OutputConfig) -> Result<Self, ConfigError> {
        let mut connector = Self::tcp(config.host.clone(), config.port);
        if config.uses_tls() {
            connector.tls = Some(load_tls_connector(&config.tls, &config.host)?);
        }
        Ok(connector)
    }

    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Open a new connection
    pub async fn connect(&self) -> io::Result<BoxedStream> {
        let connect = async {
            let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.set_nodelay(true)?;

            match &self.tls {
                Some((connector, server_name)) => {
                    let stream = connector.connect(server_name.clone(), stream).await?;
                    Ok(Box::new(stream) as BoxedStream)
                }
                None => Ok(Box::new(stream) as BoxedStream),
            }
        };

        timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let (_listener, port) = listener().await;
        let connector = Connector::tcp("127.0.0.1", port).with_timeout(Duration::from_secs(2));
        assert!(!connector.uses_tls());
        assert!(connector.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_connect_fails() {
        let (listener, port) = listener().await;
        drop(listener);

        let connector = Connector::tcp("127.0.0.1", port).with_timeout(Duration::from_secs(2));
        assert!(connector.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        // The listener never answers the TLS client hello
        let (_listener, port) = listener().await;
        let config = OutputConfig::parse(&format!("mqtts://127.0.0.1:{}", port), "host").unwrap();
        let connector = Connector::from_config(&config)
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        assert!(connector.uses_tls());

        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
