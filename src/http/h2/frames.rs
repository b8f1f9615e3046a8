//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6 that
//! a client needs, and the parsing of the ones it receives.

use super::error::{Error, ErrorCode, Result};
use super::settings::Settings;
use bytes::Bytes;
use std::fmt;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    // Common flags

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Raw HTTP/2 frame as read off the wire
///
/// The type byte is kept raw: frames of unknown type must be ignored
/// (RFC 7540 Section 4.1), not misread as a known type.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type byte
    pub kind: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: u32,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(kind: u8, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            kind,
            flags,
            stream_id,
            payload,
        }
    }

    /// Known frame type, if any
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.kind)
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Payload without the padding of a PADDED DATA or HEADERS frame
    pub fn unpadded_payload(&self) -> Result<Bytes> {
        if !self.flags.is_padded() {
            return Ok(self.payload.clone());
        }

        let Some(&pad_len) = self.payload.first() else {
            return Err(Error::FrameSize("PADDED frame without pad length".to_string()));
        };
        let pad_len = pad_len as usize;
        if 1 + pad_len > self.payload.len() {
            return Err(Error::Protocol(format!(
                "padding {} exceeds payload of {} bytes",
                pad_len,
                self.payload.len()
            )));
        }

        Ok(self.payload.slice(1..self.payload.len() - pad_len))
    }

    /// Header block fragment carried by a HEADERS frame
    ///
    /// Strips padding and the 5-byte priority block if present.
    pub fn header_block(&self) -> Result<Bytes> {
        let block = self.unpadded_payload()?;
        if self.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize("HEADERS priority block truncated".to_string()));
            }
            return Ok(block.slice(5..));
        }
        Ok(block)
    }
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
        }
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
        }
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    /// Parse a received RST_STREAM frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("RST_STREAM on stream 0".to_string()));
        }
        let code = read_u32(&frame.payload, 4, "RST_STREAM")?;
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_wire(code),
        })
    }
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    /// ACK flag
    pub ack: bool,
    /// Settings parameters
    pub settings: Settings,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }

    /// Parse a received SETTINGS frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol("SETTINGS frame must have stream ID 0".to_string()));
        }
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            return Ok(SettingsFrame::ack());
        }

        let settings = Settings::from_payload(&frame.payload)?;
        Ok(SettingsFrame::new(settings))
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    /// Parse a received PING frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.payload.len() != 8 {
            return Err(Error::FrameSize("PING must be 8 bytes".to_string()));
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&frame.payload);
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }

    /// Parse a received GOAWAY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize("GOAWAY shorter than 8 bytes".to_string()));
        }
        let last_stream_id = read_u32(&frame.payload[..4], 4, "GOAWAY")? & 0x7FFF_FFFF;
        let code = read_u32(&frame.payload[4..8], 4, "GOAWAY")?;
        Ok(GoawayFrame {
            last_stream_id,
            error_code: ErrorCode::from_wire(code),
            debug_data: frame.payload.slice(8..),
        })
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }

    /// Parse a received WINDOW_UPDATE frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        let increment = read_u32(&frame.payload, 4, "WINDOW_UPDATE")? & 0x7FFF_FFFF;
        if increment == 0 {
            return Err(Error::Protocol("WINDOW_UPDATE with zero increment".to_string()));
        }
        Ok(WindowUpdateFrame::new(frame.stream_id, increment))
    }
}

/// Read a big-endian u32 from a payload of exactly `expected` bytes
fn read_u32(payload: &[u8], expected: usize, frame: &str) -> Result<u32> {
    if payload.len() != expected {
        return Err(Error::FrameSize(format!(
            "{} payload must be {} bytes, got {}",
            frame,
            expected,
            payload.len()
        )));
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::Data.as_u8(), 0x0);
        assert_eq!(FrameType::Headers.as_u8(), 0x1);
        assert_eq!(FrameType::Continuation.as_u8(), 0x9);

        assert_eq!(FrameType::from_u8(0x0), Some(FrameType::Data));
        assert_eq!(FrameType::from_u8(0x9), Some(FrameType::Continuation));
        assert_eq!(FrameType::from_u8(0xff), None);
    }

    #[test]
    fn test_frame_type_name() {
        assert_eq!(FrameType::Data.name(), "DATA");
        assert_eq!(FrameType::Headers.name(), "HEADERS");
        assert_eq!(FrameType::Settings.name(), "SETTINGS");
    }

    #[test]
    fn test_frame_flags() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.is_end_stream());

        flags.set(FrameFlags::END_STREAM);
        assert!(flags.is_end_stream());
        assert!(!flags.is_end_headers());

        flags.set(FrameFlags::END_HEADERS);
        assert!(flags.is_end_stream());
        assert!(flags.is_end_headers());
    }

    #[test]
    fn test_unknown_frame_type_stays_unknown() {
        let frame = Frame::new(0xfa, FrameFlags::empty(), 0, Bytes::new());
        assert_eq!(frame.frame_type(), None);
    }

    #[test]
    fn test_unpadded_payload() {
        let mut payload = vec![3u8];
        payload.extend_from_slice(b"body");
        payload.extend_from_slice(&[0, 0, 0]);
        let frame = Frame::new(
            FrameType::Data.as_u8(),
            FrameFlags::from_u8(FrameFlags::PADDED),
            1,
            Bytes::from(payload),
        );
        assert_eq!(frame.unpadded_payload().unwrap(), Bytes::from("body"));

        let bad = Frame::new(
            FrameType::Data.as_u8(),
            FrameFlags::from_u8(FrameFlags::PADDED),
            1,
            Bytes::from(vec![9u8, 1, 2]),
        );
        assert!(bad.unpadded_payload().is_err());
    }

    #[test]
    fn test_header_block_skips_priority() {
        let mut payload = vec![0u8, 0, 0, 0, 16];
        payload.extend_from_slice(b"block");
        let frame = Frame::new(
            FrameType::Headers.as_u8(),
            FrameFlags::from_u8(FrameFlags::PRIORITY | FrameFlags::END_HEADERS),
            1,
            Bytes::from(payload),
        );
        assert_eq!(frame.header_block().unwrap(), Bytes::from("block"));
    }

    #[test]
    fn test_parse_rst_stream() {
        let frame = Frame::new(
            FrameType::RstStream.as_u8(),
            FrameFlags::empty(),
            5,
            Bytes::from(vec![0, 0, 0, 0x8]),
        );
        let rst = RstStreamFrame::parse(&frame).unwrap();
        assert_eq!(rst.stream_id, 5);
        assert_eq!(rst.error_code, ErrorCode::Cancel);

        let short = Frame::new(FrameType::RstStream.as_u8(), FrameFlags::empty(), 5, Bytes::new());
        assert!(matches!(RstStreamFrame::parse(&short), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_parse_goaway() {
        let mut payload = vec![0, 0, 0, 7, 0, 0, 0, 0];
        payload.extend_from_slice(b"bye");
        let frame = Frame::new(FrameType::Goaway.as_u8(), FrameFlags::empty(), 0, Bytes::from(payload));
        let goaway = GoawayFrame::parse(&frame).unwrap();
        assert_eq!(goaway.last_stream_id, 7);
        assert_eq!(goaway.error_code, ErrorCode::NoError);
        assert_eq!(goaway.debug_data, Bytes::from("bye"));
    }

    #[test]
    fn test_parse_window_update_rejects_zero() {
        let frame = Frame::new(
            FrameType::WindowUpdate.as_u8(),
            FrameFlags::empty(),
            0,
            Bytes::from(vec![0, 0, 0, 0]),
        );
        assert!(WindowUpdateFrame::parse(&frame).is_err());
    }

    #[test]
    fn test_settings_frame() {
        let frame = SettingsFrame::new(Settings::default());
        assert!(!frame.ack);

        let ack_frame = SettingsFrame::ack();
        assert!(ack_frame.ack);
    }

    #[test]
    fn test_parse_ping() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let frame = Frame::new(
            FrameType::Ping.as_u8(),
            FrameFlags::empty(),
            0,
            Bytes::copy_from_slice(&data),
        );
        let ping = PingFrame::parse(&frame).unwrap();
        assert!(!ping.ack);
        assert_eq!(ping.data, data);
    }
}
