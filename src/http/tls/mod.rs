//! TLS support for HTTP/2 client connections
//!
//! HTTP/2 over TLS is negotiated with ALPN: the client offers `h2` and the
//! server must select it, otherwise the connection cannot carry HTTP/2.
//!
//! # Architecture
//!
//! 1. `TlsConfig` holds the immutable OpenSSL connector and client options
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The HTTP/2 driver is unchanged - it transparently uses TLS operations
//!
//! # Examples
//!
//! ```no_run
//! use h2mux::http::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpStream;
//!
//! let tls_config = TlsConfig::client()
//!     .version(TlsVersion::Tls13)
//!     .servername("localhost")
//!     .verify_peer(false)
//!     .build()
//!     .unwrap();
//!
//! let tcp_stream = TcpStream::connect("127.0.0.1:8443").unwrap();
//! let tls_session = tls_config.connect(tcp_stream).unwrap();
//! ```

pub mod session;

pub use session::TlsSessionOps;

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use std::net::TcpStream;

/// ALPN protocol identifier for HTTP/2 over TLS
pub const ALPN_H2: &[u8] = b"h2";

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2, the minimum HTTP/2 permits
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("ALPN negotiation failed: expected h2, got {0:?}")]
    AlpnFailed(Option<Vec<u8>>),
}

/// TLS client configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) connector: SslConnector,
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Connect to a server with TLS and require ALPN `h2`
    pub fn connect(&self, stream: TcpStream) -> Result<TlsSessionOps> {
        TlsSessionOps::connect(stream, self)
    }
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    min_version: TlsVersion,
    max_version: TlsVersion,
    servername: Option<String>,
    verify_peer: bool,
    ca_file: Option<String>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            servername: None,
            // Default: don't verify peer (self-signed test servers)
            verify_peer: false,
            ca_file: None,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self.max_version = version;
        self
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    /// Set SNI server name (also used for hostname verification)
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable or disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Trust the CA certificates in the given PEM file
    pub fn ca_file(mut self, path: impl Into<String>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TlsConfig> {
        if self.min_version > self.max_version {
            return Err(TlsError::InvalidConfig(format!(
                "minimum version {} above maximum {}",
                self.min_version.as_str(),
                self.max_version.as_str()
            )));
        }
        if self.verify_peer && self.servername.is_none() {
            return Err(TlsError::InvalidConfig(
                "peer verification requires a server name".to_string(),
            ));
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_min_proto_version(Some(self.min_version.to_openssl_version()))?;
        builder.set_max_proto_version(Some(self.max_version.to_openssl_version()))?;

        // Wire format: length-prefixed protocol names
        let mut alpn = vec![ALPN_H2.len() as u8];
        alpn.extend_from_slice(ALPN_H2);
        builder.set_alpn_protos(&alpn)?;

        if let Some(ref path) = self.ca_file {
            builder.set_ca_file(path)?;
        }
        if !self.verify_peer {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsConfig {
            connector: builder.build(),
            servername: self.servername,
            verify_peer: self.verify_peer,
        })
    }
}
