//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::{Result, TlsConfig, TlsError, ALPN_H2};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::SslStream;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS session operations
///
/// Wraps an OpenSSL `SslStream` that negotiated `h2` via ALPN.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Perform the client handshake and verify the ALPN selection
    pub fn connect(tcp_stream: TcpStream, config: &TlsConfig) -> Result<Self> {
        let mut connect = config.connector.configure()?;
        connect = connect.verify_hostname(config.verify_peer);
        let domain = match config.servername {
            Some(ref name) => name.as_str(),
            None => {
                connect = connect.use_server_name_indication(false);
                ""
            }
        };

        let stream = connect
            .connect(domain, tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        let selected = stream.ssl().selected_alpn_protocol();
        if selected != Some(ALPN_H2) {
            return Err(TlsError::AlpnFailed(selected.map(|p| p.to_vec())));
        }

        tracing::debug!(
            version = stream.ssl().version_str(),
            "tls handshake complete, alpn h2"
        );

        Ok(TlsSessionOps {
            stream,
            failed: false,
        })
    }

    /// Check if TLS I/O failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Negotiated protocol version, e.g. "TLSv1.3"
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes already buffered by OpenSSL never show up on the fd
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        use std::net::Shutdown;
        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }
}
