//! Type-safe identifiers for coordinator entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Backing | Scope |
//! |------|---------|-------|
//! | [`ClientId`] | UUID v4 | One connected tab, unique per worker |
//! | [`RequestId`] | `u64` | One request, unique per channel |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ClientId
// ============================================================================

/// Identifies one connected client (tab) for the lifetime of its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a fresh random client ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Correlates a reply to its request on one channel.
///
/// Allocated monotonically by the channel; uniqueness is per channel,
/// not global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request ID from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_client_id_roundtrip() {
        let id = ClientId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        let back: ClientId = serde_json::from_str(&json).expect("parse");
        assert_eq!(id, back);
    }

    #[test]
    fn test_request_id_display() {
        let id = RequestId::from_u64(7);
        assert_eq!(id.to_string(), "#7");
        assert_eq!(id.as_u64(), 7);
    }

    #[test]
    fn test_request_id_serializes_as_number() {
        let id = RequestId::from_u64(42);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "42");
    }
}
