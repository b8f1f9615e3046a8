//! HTTP/2 request multiplexing
//!
//! This module implements a client that runs many independent
//! request/response exchanges over one HTTP/2 connection.
//!
//! # Architecture
//!
//! The multiplexing core does not own the socket:
//!
//! - **Settings gate** (`gate`): no application stream is opened before the
//!   peer's SETTINGS were acknowledged
//! - **Exchange table** (`exchange`): in-flight exchanges keyed by their
//!   correlation key, with blocking, bounded waits
//! - **Response assembler** (`assembler`): maps stream ids back to exchanges
//!   and accumulates headers and body until end of stream
//! - **Client facade** (`client`): the `send` operation tying it together
//!
//! The core talks to the connection only through the `Transport` and
//! `FrameHandler` traits. `connection` is the reference implementation: a
//! driver thread owning the session, the frame codec and HPACK state.
//!
//! # Examples
//!
//! ```no_run
//! use h2mux::http::h2::{ClientConfig, H2Client};
//! use h2mux::http::tls::TlsConfig;
//! use bytes::Bytes;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = TlsConfig::client()
//!     .servername("objects.example.com")
//!     .build()?;
//! let config = ClientConfig::builder()
//!     .authority("objects.example.com")
//!     .build()?;
//! let client = H2Client::connect_tls("192.0.2.10:443".parse()?, &tls, config)?;
//!
//! let stored = client.put_object("bucket1", "obj1", Bytes::from(vec![0u8; 1024]), 1024);
//! println!("stored: {}", stored);
//! client.close()?;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod client;
pub mod codec;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod exchange;
pub mod frames;
pub mod gate;
pub mod mux;
pub mod request;
pub mod settings;
pub mod stream;
pub mod transport;

pub use client::{ClientConfig, ClientConfigBuilder, H2Client};
pub use connection::{Connection, ConnectionConfig, ConnectionHandle};
pub use correlation::{CorrelationKey, CORRELATION_HEADER};
pub use error::{Error, ErrorCode, Result};
pub use exchange::{ExchangeHandle, ExchangeRef, ExchangeStatus, PendingExchanges};
pub use gate::{SettingsGate, SettingsState};
pub use mux::Multiplexer;
pub use request::{PutRequest, RequestSummary, Response};
pub use settings::{Settings, SettingsBuilder};
pub use stream::StreamId;
pub use transport::{FrameHandler, Transport};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
