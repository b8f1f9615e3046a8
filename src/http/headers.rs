//! HTTP/2 header field list
//!
//! Header fields are kept as an ordered list so that repeated names survive
//! decoding intact. HTTP/2 requires lowercase field names, so names are
//! normalised on insertion and lookups are case-insensitive.

use super::MAX_HEADERS;
use std::fmt;

/// Ordered header field collection
///
/// Headers are stored in insertion order and support:
/// - Case-insensitive header name lookups
/// - Multiple values for the same header name
/// - Pseudo-header fields (`:status`, `:path`, ...) alongside regular fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Append a header field
    ///
    /// An existing field with the same name is kept; the new value is added
    /// after it.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers.len() >= MAX_HEADERS {
            tracing::warn!(limit = MAX_HEADERS, "header list full, dropping field");
            return;
        }

        let mut name = name.into();
        name.make_ascii_lowercase();
        self.headers.push((name, value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header, in arrival order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Append every field of `other`, preserving its order
    pub fn extend(&mut self, other: Headers) {
        for (name, value) in other.headers {
            self.insert(name, value);
        }
    }

    /// Get the number of header fields
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no header fields
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all header fields
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Iterate over regular (non-pseudo) header fields
    pub fn regular(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(n, _)| !n.starts_with(':'))
    }

    /// Build a header list from HPACK-decoded name/value pairs
    ///
    /// Non UTF-8 octets are replaced, matching how the values are surfaced
    /// to callers as strings.
    pub fn from_hpack(decoded: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        decoded
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect()
    }

    /// Borrow the fields as byte pairs for the HPACK encoder
    pub fn as_hpack_pairs(&self) -> Vec<(&[u8], &[u8])> {
        self.headers
            .iter()
            .map(|(n, v)| (n.as_bytes(), v.as_bytes()))
            .collect()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}
