//! Error types for the sync coordinator.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use sync_coordinator::{Result, Error};
//!
//! async fn example(channel: &Channel) -> Result<()> {
//!     channel.ping().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Protocol | [`Error::Protocol`], [`Error::UnknownKind`] |
//! | Transport | [`Error::Disconnected`], [`Error::RequestTimeout`], [`Error::TooManyRequests`] |
//! | Peer | [`Error::Peer`] |
//! | Handshake | [`Error::Handshake`] |
//! | Engine | [`Error::Engine`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation: malformed payload or message shape.
    ///
    /// Surfaces as a failed reply on the offending request; the channel
    /// itself stays alive.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Unknown message kind for this handler.
    #[error("Unknown message kind: {kind}")]
    UnknownKind {
        /// The unrecognized kind, as it appeared on the wire.
        kind: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The port closed; in-flight requests fail with this.
    #[error("Disconnected")]
    Disconnected,

    /// A request did not receive its reply within the timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many requests already in flight on this channel.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyRequests {
        /// Requests currently awaiting replies.
        pending: usize,
        /// Channel limit.
        max: usize,
    },

    // ========================================================================
    // Peer Errors
    // ========================================================================
    /// The peer replied with an error to a request.
    #[error("Peer error: {message}")]
    Peer {
        /// Error message echoed from the peer's reply.
        message: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// The database handshake with a host candidate failed.
    ///
    /// Covers `requestDatabase` failures and endpoint connect failures.
    /// The runner stays without an engine and retries on a later event.
    #[error("Database handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// The streaming-sync engine failed to start or abort.
    #[error("Engine error: {message}")]
    Engine {
        /// Description of the engine failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unknown-kind error.
    #[inline]
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind { kind: kind.into() }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a peer error from an error reply.
    #[inline]
    pub fn peer(message: impl Into<String>) -> Self {
        Self::Peer {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates an engine error.
    #[inline]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this error means the peer is unreachable.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` if this is a protocol-level error.
    #[inline]
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::UnknownKind { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("bad payload");
        assert_eq!(err.to_string(), "Protocol error: bad payload");
    }

    #[test]
    fn test_unknown_kind_display() {
        let err = Error::unknown_kind("frobnicate");
        assert_eq!(err.to_string(), "Unknown message kind: frobnicate");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(RequestId::from_u64(1), 5000);
        let other_err = Error::protocol("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_disconnected() {
        assert!(Error::Disconnected.is_disconnected());
        assert!(!Error::peer("nope").is_disconnected());
    }

    #[test]
    fn test_is_protocol() {
        assert!(Error::protocol("x").is_protocol());
        assert!(Error::unknown_kind("y").is_protocol());
        assert!(!Error::Disconnected.is_protocol());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
