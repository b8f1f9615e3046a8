//! HTTP/2 frame encoding and decoding
//!
//! This module provides the frame encoding used by the connection driver and
//! the blocking frame reader that feeds its event path.

use super::error::{Error, Result};
use super::frames::*;
use crate::http::{HttpSession, SessionOps};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FFFFFF;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header into a buffer
    pub fn encode_header(frame_type: FrameType, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        // Type (8 bits)
        header[3] = frame_type.as_u8();

        // Flags (8 bits)
        header[4] = flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = stream_id & 0x7FFFFFFF; // Mask reserved bit
        header[5] = ((stream_id >> 24) & 0xFF) as u8;
        header[6] = ((stream_id >> 16) & 0xFF) as u8;
        header[7] = ((stream_id >> 8) & 0xFF) as u8;
        header[8] = (stream_id & 0xFF) as u8;

        header
    }

    /// Decode a frame header into (type byte, flags, stream id, payload length)
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
        // Length (24 bits, big-endian)
        let length = ((bytes[0] as usize) << 16)
            | ((bytes[1] as usize) << 8)
            | (bytes[2] as usize);

        // Type (8 bits), kept raw so unknown types can be skipped
        let kind = bytes[3];

        // Flags (8 bits)
        let flags = FrameFlags::from_u8(bytes[4]);

        // Stream ID (31 bits, ignore reserved bit)
        let stream_id = ((bytes[5] as u32 & 0x7F) << 24)  // Mask reserved bit
            | ((bytes[6] as u32) << 16)
            | ((bytes[7] as u32) << 8)
            | (bytes[8] as u32);

        (kind, flags, stream_id, length)
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.data.len());

        let flags = if frame.end_stream {
            FrameFlags::from_u8(FrameFlags::END_STREAM)
        } else {
            FrameFlags::empty()
        };

        let header = Self::encode_header(FrameType::Data, flags, frame.stream_id, frame.data.len());
        buf.put_slice(&header);
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());

        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let header = Self::encode_header(FrameType::Headers, flags, frame.stream_id, frame.header_block.len());
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());

        let flags = if frame.end_headers {
            FrameFlags::from_u8(FrameFlags::END_HEADERS)
        } else {
            FrameFlags::empty()
        };

        let header = Self::encode_header(FrameType::Continuation, flags, frame.stream_id, frame.header_block.len());
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a complete header block as HEADERS plus CONTINUATION frames
    ///
    /// Each fragment is at most `max_frame_size` bytes; END_STREAM rides on
    /// the HEADERS frame, END_HEADERS on the last fragment.
    pub fn encode_header_block(stream_id: u32, block: Bytes, end_stream: bool, max_frame_size: usize) -> BytesMut {
        let max_frame_size = max_frame_size.max(1);
        let mut out = BytesMut::with_capacity(block.len() + FRAME_HEADER_SIZE * (1 + block.len() / max_frame_size));

        let first_len = block.len().min(max_frame_size);
        let first = HeadersFrame::new(stream_id, block.slice(..first_len), end_stream, first_len == block.len());
        out.put_slice(&Self::encode_headers_frame(&first));

        let mut offset = first_len;
        while offset < block.len() {
            let end = (offset + max_frame_size).min(block.len());
            let continuation = ContinuationFrame {
                stream_id,
                header_block: block.slice(offset..end),
                end_headers: end == block.len(),
            };
            out.put_slice(&Self::encode_continuation_frame(&continuation));
            offset = end;
        }

        out
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let entries = if frame.ack { Vec::new() } else { frame.settings.entries() };

        // Each setting is 6 bytes (2 byte ID + 4 byte value)
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + entries.len() * 6);

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        // Stream ID must be 0 for SETTINGS
        let header = Self::encode_header(FrameType::Settings, flags, 0, entries.len() * 6);
        buf.put_slice(&header);
        for (parameter, value) in entries {
            buf.put_u16(parameter.as_u16());
            buf.put_u32(value);
        }

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let header = Self::encode_header(FrameType::Ping, flags, 0, 8);
        buf.put_slice(&header);
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        // Last stream ID + error code + opaque debug data
        let payload_len = 8 + frame.debug_data.len();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        let header = Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len);
        buf.put_slice(&header);
        buf.put_u32(frame.last_stream_id & 0x7FFFFFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        let header = Self::encode_header(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        // Reserved bit must be 0
        buf.put_u32(frame.size_increment & 0x7FFFFFFF);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        let header = Self::encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }

    fn check_payload_len(payload_len: usize, max_frame_size: usize) -> Result<()> {
        if payload_len > max_frame_size.min(MAX_FRAME_SIZE) {
            return Err(Error::FrameSize(format!(
                "Frame payload too large: {}",
                payload_len
            )));
        }
        Ok(())
    }

    /// Take one complete frame off the front of `buf`
    ///
    /// Returns `None`, leaving `buf` untouched, until the whole frame is
    /// buffered. An oversized length is rejected as soon as the header is in.
    pub fn decode_frame(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let (kind, flags, stream_id, payload_len) = Self::decode_header(&header);
        Self::check_payload_len(payload_len, max_frame_size)?;

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();
        Ok(Some(Frame::new(kind, flags, stream_id, payload)))
    }

    /// Read one frame from a session
    ///
    /// Blocks until the whole frame has arrived or the session times out.
    /// Payloads larger than `max_frame_size` are rejected with FRAME_SIZE_ERROR.
    pub fn read_frame<S: SessionOps>(session: &mut HttpSession<S>, max_frame_size: usize) -> Result<Frame> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        session.read_exact(&mut header)?;

        let (kind, flags, stream_id, payload_len) = Self::decode_header(&header);
        Self::check_payload_len(payload_len, max_frame_size)?;

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            session.read_exact(&mut payload)?;
        }

        Ok(Frame::new(kind, flags, stream_id, Bytes::from(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorCode;
    use crate::http::h2::settings::SettingsBuilder;

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let (kind, decoded_flags, decoded_id, decoded_len) = FrameCodec::decode_header(&header);

        assert_eq!(kind, FrameType::Headers.as_u8());
        assert_eq!(decoded_flags.as_u8(), flags.as_u8());
        assert_eq!(decoded_id, 42);
        assert_eq!(decoded_len, 1234);
    }

    #[test]
    fn test_decode_header_masks_reserved_bit() {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 7, 0);
        header[5] |= 0x80;
        let (_, _, stream_id, _) = FrameCodec::decode_header(&header);
        assert_eq!(stream_id, 7);
    }

    #[test]
    fn test_decode_frame_waits_for_whole_frame() {
        let encoded = FrameCodec::encode_data_frame(&DataFrame::new(3, Bytes::from("payload"), true));
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&encoded[..5]);
        assert!(FrameCodec::decode_frame(&mut buf, 16384).unwrap().is_none());
        buf.extend_from_slice(&encoded[5..12]);
        assert!(FrameCodec::decode_frame(&mut buf, 16384).unwrap().is_none());
        assert_eq!(buf.len(), 12);

        buf.extend_from_slice(&encoded[12..]);
        buf.extend_from_slice(&encoded[..4]);
        let frame = FrameCodec::decode_frame(&mut buf, 16384).unwrap().unwrap();
        assert_eq!(frame.frame_type(), Some(FrameType::Data));
        assert_eq!(frame.stream_id, 3);
        assert!(frame.flags.is_end_stream());
        assert_eq!(frame.payload, Bytes::from("payload"));

        // Start of the next frame stays buffered
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_decode_frame_rejects_oversized_header() {
        let header = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 1, 20000);
        let mut buf = BytesMut::from(&header[..]);
        assert!(matches!(
            FrameCodec::decode_frame(&mut buf, 16384),
            Err(Error::FrameSize(_))
        ));
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        let encoded = FrameCodec::encode_data_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 5]); // Length = 5
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]); // Stream ID = 1
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_header_block_single_frame() {
        let encoded = FrameCodec::encode_header_block(3, Bytes::from("abc"), true, 16384);

        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 3);
        assert_eq!(encoded[3], FrameType::Headers.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        assert_eq!(&encoded[9..], b"abc");
    }

    #[test]
    fn test_encode_header_block_with_continuation() {
        let block = Bytes::from(vec![7u8; 10]);
        let encoded = FrameCodec::encode_header_block(1, block, false, 4);

        // HEADERS(4) + CONTINUATION(4) + CONTINUATION(2)
        assert_eq!(encoded.len(), 3 * FRAME_HEADER_SIZE + 10);

        assert_eq!(encoded[3], FrameType::Headers.as_u8());
        assert_eq!(encoded[4], 0); // neither END_STREAM nor END_HEADERS

        let second = FRAME_HEADER_SIZE + 4;
        assert_eq!(encoded[second + 3], FrameType::Continuation.as_u8());
        assert_eq!(encoded[second + 4], 0);

        let third = second + FRAME_HEADER_SIZE + 4;
        assert_eq!(encoded[third + 3], FrameType::Continuation.as_u8());
        assert_eq!(encoded[third + 4], FrameFlags::END_HEADERS);
        assert_eq!(encoded[third..third + 3], [0, 0, 2]);
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let frame = SettingsFrame::new(settings);
        let encoded = FrameCodec::encode_settings_frame(&frame);

        assert_eq!(encoded[3], FrameType::Settings.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]); // Stream ID must be 0

        // 3 settings * 6 bytes
        assert_eq!(encoded[0..3], [0, 0, 18]);
    }

    #[test]
    fn test_encode_settings_ack() {
        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::ack());

        assert_eq!(encoded[0..3], [0, 0, 0]);
        assert_eq!(encoded[4], FrameFlags::ACK);
    }

    #[test]
    fn test_encode_goaway() {
        let frame = GoawayFrame::new(5, ErrorCode::NoError, Bytes::from("done"));
        let encoded = FrameCodec::encode_goaway_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 12]);
        assert_eq!(&encoded[9..13], &[0, 0, 0, 5]);
        assert_eq!(&encoded[13..17], &[0, 0, 0, 0]);
        assert_eq!(&encoded[17..], b"done");
    }

    #[test]
    fn test_encode_window_update() {
        let frame = WindowUpdateFrame::new(42, 1000);
        let encoded = FrameCodec::encode_window_update_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::WindowUpdate.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);

        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }
}
