//! Correlation keys.
//!
//! A [`CorrelationKey`] identifies exactly one in-flight request. It travels as
//! the message key of both the request and the reply record, so the transport
//! also uses it for partitioning.
//!
//! Keys must be unique per *request*, not per requester: two concurrent requests
//! from the same user keyed by the user id would share a reply slot, and one of
//! them would receive the other's answer. Use [`CorrelationKey::generate`] unless
//! the caller already owns a per-request identifier (such as a transaction id).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for one in-flight request.
///
/// # Example
///
/// ```
/// use reply_bridge_core::CorrelationKey;
///
/// let a = CorrelationKey::generate();
/// let b = CorrelationKey::generate();
/// assert_ne!(a, b);
///
/// let fixed = CorrelationKey::from("req-7");
/// assert_eq!(fixed.as_bytes(), b"req-7");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey(Vec<u8>);

impl CorrelationKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Generate a fresh random key (UUID v4, hyphenated text form).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into_bytes())
    }

    /// The raw key bytes, as written to the transport.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the key and return its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Whether the key has no bytes at all.
    ///
    /// Empty keys are representable (a record may arrive without a key) but
    /// the correlator refuses to register them.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationKey({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&[u8]> for CorrelationKey {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl From<Vec<u8>> for CorrelationKey {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<Uuid> for CorrelationKey {
    fn from(value: Uuid) -> Self {
        Self(value.to_string().into_bytes())
    }
}

impl AsRef<[u8]> for CorrelationKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn generated_keys_are_unique() {
        let keys: HashSet<_> = (0..1000).map(|_| CorrelationKey::generate()).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn generated_keys_are_not_empty() {
        assert!(!CorrelationKey::generate().is_empty());
    }

    #[test]
    fn display_is_lossy_utf8() {
        assert_eq!(CorrelationKey::from("req-7").to_string(), "req-7");
        assert_eq!(CorrelationKey::new(vec![0x66, 0xff]).to_string(), "f\u{fffd}");
    }

    #[test]
    fn debug_shows_key_text() {
        assert_eq!(format!("{:?}", CorrelationKey::from("k")), "CorrelationKey(\"k\")");
    }

    proptest! {
        #[test]
        fn bytes_survive_construction(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let key = CorrelationKey::from(bytes.as_slice());
            prop_assert_eq!(key.is_empty(), bytes.is_empty());
            prop_assert_eq!(key.into_bytes(), bytes);
        }
    }
}
