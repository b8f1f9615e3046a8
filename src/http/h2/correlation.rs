//! Correlation keys
//!
//! A correlation key identifies an exchange before the connection has
//! assigned it a stream id. It is derived from the bucket and object key of
//! the request. Both parts are kept separately, so `("ab", "c")` and
//! `("a", "bc")` are different keys.
//!
//! Callers are responsible for not reusing a key while an exchange with that
//! key is still live: no uniqueness salt is added.

use std::fmt;

/// Name of the extension header carrying the correlation key on the wire
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Composite correlation key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey {
    bucket: String,
    key: String,
}

impl CorrelationKey {
    /// Derive the key for an object
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        CorrelationKey {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Bucket component
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key component
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Request path, `/{bucket}/{key}`
    pub fn path(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }

    /// Value of the correlation header
    ///
    /// The bucket is escaped so the first unescaped `/` always separates the
    /// two components; distinct keys never share a wire value.
    pub fn wire_value(&self) -> String {
        let mut out = String::with_capacity(self.bucket.len() + self.key.len() + 1);
        for c in self.bucket.chars() {
            match c {
                '%' => out.push_str("%25"),
                '/' => out.push_str("%2F"),
                c => out.push(c),
            }
        }
        out.push('/');
        out.push_str(&self.key);
        out
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_concatenation_collisions_are_distinct() {
        let a = CorrelationKey::new("ab", "c");
        let b = CorrelationKey::new("a", "bc");
        assert_ne!(a, b);
        assert_ne!(a.wire_value(), b.wire_value());
    }

    #[test]
    fn test_deterministic() {
        let a = CorrelationKey::new("bucket1", "obj1");
        let b = CorrelationKey::new("bucket1", "obj1");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_path() {
        let key = CorrelationKey::new("dummy-bucket", "dummy-key");
        assert_eq!(key.path(), "/dummy-bucket/dummy-key");
    }

    #[test]
    fn test_wire_value_escapes_bucket() {
        let a = CorrelationKey::new("a/b", "c");
        let b = CorrelationKey::new("a", "b/c");
        assert_eq!(a.wire_value(), "a%2Fb/c");
        assert_eq!(b.wire_value(), "a/b/c");

        let pct = CorrelationKey::new("a%2Fb", "c");
        assert_eq!(pct.wire_value(), "a%252Fb/c");
        assert_ne!(pct.wire_value(), a.wire_value());
    }
}
