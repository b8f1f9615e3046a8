//! Request and response shapes
//!
//! `PutRequest` is the only request the client issues: an object upload
//! addressed by bucket and key, carrying the correlation key in an extension
//! header. `Response` is what the assembler hands back once a stream ended.

use super::correlation::{CorrelationKey, CORRELATION_HEADER};
use super::error::{Error, Result};
use super::stream::StreamId;
use crate::http::Headers;
use bytes::Bytes;

/// Default value of `x-emc-index-granularity`
pub const DEFAULT_INDEX_GRANULARITY: u64 = 131_072;

/// Short description of a request, kept in the exchange record for logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: &'static str,
    pub path: String,
    pub content_length: usize,
}

/// Object upload request
#[derive(Debug, Clone)]
pub struct PutRequest {
    key: CorrelationKey,
    headers: Headers,
    body: Bytes,
}

impl PutRequest {
    /// Build the request for `key`
    ///
    /// `content_length` must match the payload; a mismatch is rejected here,
    /// before anything is registered or written.
    pub fn new(
        key: CorrelationKey,
        authority: &str,
        scheme: &str,
        index_granularity: u64,
        body: Bytes,
        content_length: usize,
    ) -> Result<Self> {
        if body.len() != content_length {
            return Err(Error::InvalidRequest(format!(
                "content length {} does not match payload of {} bytes",
                content_length,
                body.len()
            )));
        }
        if authority.is_empty() {
            return Err(Error::InvalidRequest("empty authority".to_string()));
        }

        let mut headers = Headers::new();
        headers.insert(":method", "PUT");
        headers.insert(":scheme", scheme);
        headers.insert(":authority", authority);
        headers.insert(":path", key.path());
        headers.insert("accept", "*/*");
        headers.insert("content-length", content_length.to_string());
        headers.insert("content-type", "application/octet-stream");
        headers.insert("x-emc-index-granularity", index_granularity.to_string());
        headers.insert("accept-encoding", "gzip, deflate");
        headers.insert(CORRELATION_HEADER, key.wire_value());

        Ok(PutRequest { key, headers, body })
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Header list in wire order, pseudo headers first
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Check if the HEADERS frame ends the request
    pub fn ends_with_headers(&self) -> bool {
        self.body.is_empty()
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: "PUT",
            path: self.key.path(),
            content_length: self.body.len(),
        }
    }
}

/// Completed HTTP/2 response
#[derive(Debug, Clone)]
pub struct Response {
    stream_id: StreamId,
    status: u16,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Create a response
    pub fn new(stream_id: StreamId, status: u16, headers: Headers, body: Bytes) -> Self {
        Response {
            stream_id,
            status,
            headers,
            body,
        }
    }

    /// Stream the response arrived on
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Get status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Check if the upload succeeded
    ///
    /// Only 200 counts; other 2xx codes are not what the object store
    /// answers to a successful PUT.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// All header fields, including `:status` and trailers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get body as string
    pub fn body_string(&self) -> Option<String> {
        String::from_utf8(self.body.to_vec()).ok()
    }
}
