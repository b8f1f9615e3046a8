//! HTTP/2 client facade
//!
//! `H2Client` is what applications call. Each `send` waits for the settings
//! handshake, registers an exchange under the request's correlation key,
//! writes the request through the transport and blocks until the matching
//! response arrives or the deadline passes. Any number of threads may call
//! `send` on one client concurrently; their exchanges share one connection.

use super::connection::{Connection, ConnectionConfig, ConnectionHandle};
use super::correlation::CorrelationKey;
use super::error::{Error, Result};
use super::mux::Multiplexer;
use super::request::{PutRequest, Response, DEFAULT_INDEX_GRANULARITY};
use super::settings::Settings;
use super::transport::Transport;
use crate::http::session::{connect_tcp, from_tcp_stream};
use crate::http::tls::TlsConfig;
use crate::http::{HttpSession, SessionOps};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default deadline for `put_object`
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for the settings handshake in `wait_ready`
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    authority: String,
    scheme: String,
    handshake_timeout: Duration,
    request_timeout: Duration,
    index_granularity: u64,
    connection: ConnectionConfig,
}

impl ClientConfig {
    /// Create a configuration builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Value sent as `:authority`
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Value sent as `:scheme`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn index_granularity(&self) -> u64 {
        self.index_granularity
    }

    /// Settings for the reference connection
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    authority: Option<String>,
    scheme: String,
    handshake_timeout: Duration,
    request_timeout: Duration,
    index_granularity: u64,
    connection: ConnectionConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ClientConfigBuilder {
            authority: None,
            scheme: "https".to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            index_granularity: DEFAULT_INDEX_GRANULARITY,
            connection: ConnectionConfig::default(),
        }
    }

    /// Host (and optional port) of the object store
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Scheme marker, `https` unless changed
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Deadline used by `put_object`
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn index_granularity(mut self, granularity: u64) -> Self {
        self.index_granularity = granularity;
        self
    }

    /// SETTINGS to announce in the connection preface
    pub fn settings(mut self, settings: Settings) -> Self {
        self.connection.settings = settings;
        self
    }

    /// How long the connection driver polls before serving queued requests
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.connection.poll_interval = interval;
        self
    }

    /// Session I/O timeout
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.connection.io_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ClientConfig> {
        let authority = match self.authority {
            Some(a) if !a.is_empty() => a,
            _ => return Err(Error::InvalidRequest("authority is required".to_string())),
        };
        if self.scheme.is_empty() {
            return Err(Error::InvalidRequest("scheme must not be empty".to_string()));
        }
        if self.connection.poll_interval.is_zero() || self.connection.io_timeout.is_zero() {
            return Err(Error::InvalidRequest("connection timeouts must be non-zero".to_string()));
        }
        self.connection.settings.validate()?;

        Ok(ClientConfig {
            authority,
            scheme: self.scheme,
            handshake_timeout: self.handshake_timeout,
            request_timeout: self.request_timeout,
            index_granularity: self.index_granularity,
            connection: self.connection,
        })
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Multiplexing HTTP/2 client
pub struct H2Client<T: Transport> {
    config: ClientConfig,
    mux: Arc<Multiplexer>,
    transport: T,
}

impl<T: Transport> H2Client<T> {
    /// Create a client over a transport that reports its frames to `mux`
    pub fn new(config: ClientConfig, mux: Arc<Multiplexer>, transport: T) -> Self {
        H2Client {
            config,
            mux,
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connection state shared with the transport
    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.mux
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Wait for the settings handshake
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.mux.gate().wait(timeout).map_err(|e| match e {
            Error::Timeout => Error::HandshakeTimeout,
            other => other,
        })
    }

    /// Upload an object and wait for the response
    ///
    /// `timeout` bounds the whole call: the settings handshake, the write and
    /// the wait for the response.
    ///
    /// # Errors
    ///
    /// - `HandshakeTimeout` if the connection never became ready
    /// - `InvalidRequest` if `content_length` does not match the payload
    /// - `DuplicateKey` if an exchange for the same bucket and key is live
    /// - `WriteFailure` if the transport could not write the request
    /// - `Timeout` if the request could not be written or answered in time
    /// - `StreamError` if the peer reset or refused the stream
    pub fn send(&self, bucket: &str, key: &str, payload: Bytes, content_length: usize, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        self.wait_ready(timeout)?;

        let key = CorrelationKey::new(bucket, key);
        let request = PutRequest::new(
            key.clone(),
            &self.config.authority,
            &self.config.scheme,
            self.config.index_granularity,
            payload,
            content_length,
        )?;

        let table = self.mux.exchanges();
        let handle = table.register(key, request.summary())?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.transport.write(handle.exchange(), &request, remaining) {
            Ok(stream_id) => {
                table.attach_stream(handle.exchange(), stream_id);
            }
            Err(e) => {
                let error = match e {
                    Error::WriteFailure(msg) => Error::WriteFailure(msg),
                    Error::Timeout => Error::Timeout,
                    other => Error::WriteFailure(other.to_string()),
                };
                warn!(key = %handle.key(), %error, "request write failed");
                table.fail(handle.exchange(), error);
                return handle.wait(Duration::ZERO);
            }
        }

        handle.wait(deadline.saturating_duration_since(Instant::now()))
    }

    /// Upload an object with the configured request timeout
    ///
    /// Returns true only for a 200 response; failures are logged.
    pub fn put_object(&self, bucket: &str, key: &str, payload: Bytes, content_length: usize) -> bool {
        match self.send(bucket, key, payload, content_length, self.config.request_timeout) {
            Ok(response) if response.is_success() => {
                debug!(bucket, key, stream_id = response.stream_id(), "object stored");
                true
            }
            Ok(response) => {
                warn!(bucket, key, status = response.status(), "object store rejected upload");
                false
            }
            Err(e) => {
                error!(bucket, key, error = %e, "upload failed");
                false
            }
        }
    }
}

impl H2Client<ConnectionHandle> {
    /// Connect over plain TCP
    pub fn connect(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let tcp = connect_tcp(addr, config.connection.io_timeout)?;
        Self::from_session(from_tcp_stream(tcp), config)
    }

    /// Connect over TLS, negotiating `h2` via ALPN
    pub fn connect_tls(addr: SocketAddr, tls: &TlsConfig, config: ClientConfig) -> Result<Self> {
        let tcp = connect_tcp(addr, config.connection.io_timeout)?;
        let session = tls.connect(tcp)?;
        Self::from_session(HttpSession::new(session), config)
    }

    /// Start a connection on an already established session
    pub fn from_session<S: SessionOps + 'static>(session: HttpSession<S>, config: ClientConfig) -> Result<Self> {
        let mux = Arc::new(Multiplexer::new());
        let handle = Connection::open(session, config.connection.clone(), Arc::clone(&mux))?;
        debug!(authority = %config.authority, "connection started");
        Ok(H2Client::new(config, mux, handle))
    }

    /// Close the connection; pending exchanges fail with `ConnectionClosed`
    pub fn close(&self) -> Result<()> {
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder().authority("localhost:9021").build().unwrap();
        assert_eq!(config.authority(), "localhost:9021");
        assert_eq!(config.scheme(), "https");
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.index_granularity(), 131_072);
        assert_eq!(config.connection().settings.enable_push, Some(false));
    }

    #[test]
    fn test_builder_requires_authority() {
        assert!(matches!(
            ClientConfig::builder().build(),
            Err(Error::InvalidRequest(_))
        ));
        assert!(ClientConfig::builder().authority("").build().is_err());
    }

    #[test]
    fn test_builder_validates_settings() {
        let settings = Settings {
            max_frame_size: Some(100),
            ..Settings::new()
        };
        let result = ClientConfig::builder()
            .authority("localhost")
            .settings(settings)
            .build();
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }
}
