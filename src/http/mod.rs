//! HTTP transport layer for h2mux
//!
//! This module holds everything below the multiplexing core: the session
//! abstraction over plain TCP and TLS, the header collection shared by
//! requests and responses, and the HTTP/2 implementation itself.
//!
//! # Architecture
//!
//! The transport uses a session operations abstraction so the HTTP/2 code
//! never needs to know whether it talks over TCP or TLS:
//!
//! - `SessionOps` trait defines operations (poll, read, write, flush, close)
//! - `HttpSession` wraps a `SessionOps` and applies an I/O timeout
//! - `tls::TlsSessionOps` and `session::FdSessionOps` are the two implementations
//!
//! # Examples
//!
//! ```no_run
//! use h2mux::http::h2::{ClientConfig, H2Client};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .authority("127.0.0.1:8443")
//!     .build()?;
//! let client = H2Client::connect("127.0.0.1:8443".parse()?, config)?;
//!
//! let payload = bytes::Bytes::from(vec![0u8; 1024]);
//! let response = client.send("dummy-bucket", "dummy-key", payload, 1024, Duration::from_secs(60))?;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

pub mod h2;
pub mod headers;
pub mod session;
pub mod tls;

pub use headers::Headers;
pub use session::{connect_tcp, FdSessionOps, HttpSession, PollEvents, SessionOps};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Maximum number of header fields kept per message
pub const MAX_HEADERS: usize = 128;
