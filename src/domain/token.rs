//! Type-safe observation token.
//!
//! [`ObserveToken`] is a newtype wrapper around the opaque CoAP token bytes
//! a peer chose for its observe request, so tokens cannot be confused with
//! payloads or other byte buffers.

use std::fmt;

/// Opaque identifier of one observation, chosen by the requesting peer.
///
/// Used as the key of [`super::ObserverRegistry`] and echoed on every
/// notification so the peer can correlate it with its original request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObserveToken(Vec<u8>);

impl ObserveToken {
    /// Creates a token from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns `true` for the zero-length token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ObserveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<empty>");
        }
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<&[u8]> for ObserveToken {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for ObserveToken {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
