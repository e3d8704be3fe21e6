//! Message types exchanged between tabs and the worker.
//!
//! Every frame on a port carries one [`WireMessage`]:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `kind` | One of the nine [`MessageKind`]s |
//! | `correlationId` | Present on requests and replies, absent on notifications |
//! | `payload` | Kind-specific JSON value |
//! | `isReply` | Set on replies; replies echo the request's correlation ID |
//! | `error` | Set on failed replies instead of a payload |
//!
//! # Directions
//!
//! | Kind | Direction | Shape |
//! |------|-----------|-------|
//! | `startSynchronization` | tab → worker | request |
//! | `abortSynchronization` | tab → worker | request |
//! | `ping` | either | request |
//! | `requestDatabase` | worker → tab | request |
//! | `credentialsCallback` | worker → tab | request |
//! | `invalidCredentialsCallback` | worker → tab | request |
//! | `uploadCrud` | worker → tab | request |
//! | `notifySyncStatus` | worker → tab | notification |
//! | `logEvent` | worker → tab | notification |

// ============================================================================
// Submodules
// ============================================================================

/// Message kinds and the wire frame.
pub mod message;

/// Typed payloads for kinds that carry data.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{MessageKind, WireMessage};
pub use payload::{
    DatabaseEndpointInfo, LogEventParams, StartSynchronizationParams, empty_payload,
    parse_payload,
};
