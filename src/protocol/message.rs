//! Message kinds and the wire frame.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// MessageKind
// ============================================================================

/// The closed set of message kinds understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Tab asks the worker to join the sync pipeline for a database.
    StartSynchronization,
    /// Tab leaves the sync pipeline it previously joined.
    AbortSynchronization,
    /// Liveness round-trip; acknowledged by the channel itself.
    Ping,
    /// Worker asks a tab for its database endpoint.
    RequestDatabase,
    /// Worker asks a tab for fresh credentials.
    CredentialsCallback,
    /// Worker tells a tab its credentials were rejected.
    InvalidCredentialsCallback,
    /// Worker asks a tab to upload pending local writes.
    UploadCrud,
    /// Worker pushes a serialized sync status to a tab.
    NotifySyncStatus,
    /// Worker forwards a formatted log line to a tab.
    LogEvent,
}

impl MessageKind {
    /// Returns the kind's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartSynchronization => "startSynchronization",
            Self::AbortSynchronization => "abortSynchronization",
            Self::Ping => "ping",
            Self::RequestDatabase => "requestDatabase",
            Self::CredentialsCallback => "credentialsCallback",
            Self::InvalidCredentialsCallback => "invalidCredentialsCallback",
            Self::UploadCrud => "uploadCrud",
            Self::NotifySyncStatus => "notifySyncStatus",
            Self::LogEvent => "logEvent",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// WireMessage
// ============================================================================

/// One structured message on a port.
///
/// # Format
///
/// Request:
/// ```json
/// { "kind": "startSynchronization", "correlationId": 1, "payload": { ... } }
/// ```
///
/// Reply:
/// ```json
/// { "kind": "startSynchronization", "correlationId": 1, "isReply": true, "payload": {} }
/// ```
///
/// Failed reply:
/// ```json
/// { "kind": "requestDatabase", "correlationId": 2, "isReply": true, "error": "..." }
/// ```
///
/// Notification:
/// ```json
/// { "kind": "notifySyncStatus", "payload": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message kind.
    pub kind: MessageKind,

    /// Correlation identifier; requests carry one, replies echo it,
    /// notifications carry none.
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<RequestId>,

    /// Kind-specific payload.
    #[serde(default)]
    pub payload: Value,

    /// Set on replies.
    #[serde(rename = "isReply", default, skip_serializing_if = "is_false")]
    pub is_reply: bool,

    /// Error message on failed replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl WireMessage {
    /// Creates a correlated request.
    #[must_use]
    pub fn request(kind: MessageKind, correlation_id: RequestId, payload: Value) -> Self {
        Self {
            kind,
            correlation_id: Some(correlation_id),
            payload,
            is_reply: false,
            error: None,
        }
    }

    /// Creates a successful reply echoing the request's correlation ID.
    #[must_use]
    pub fn reply(kind: MessageKind, correlation_id: RequestId, payload: Value) -> Self {
        Self {
            kind,
            correlation_id: Some(correlation_id),
            payload,
            is_reply: true,
            error: None,
        }
    }

    /// Creates a failed reply.
    #[must_use]
    pub fn error_reply(
        kind: MessageKind,
        correlation_id: RequestId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            correlation_id: Some(correlation_id),
            payload: Value::Null,
            is_reply: true,
            error: Some(message.into()),
        }
    }

    /// Creates an uncorrelated notification.
    #[must_use]
    pub fn notification(kind: MessageKind, payload: Value) -> Self {
        Self {
            kind,
            correlation_id: None,
            payload,
            is_reply: false,
            error: None,
        }
    }

    /// Returns `true` if this message expects a reply.
    #[inline]
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.correlation_id.is_some() && !self.is_reply
    }

    /// Extracts the reply payload, surfacing failed replies as errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Peer`] if the reply carried an error.
    pub fn into_reply_payload(self) -> Result<Value> {
        match self.error {
            Some(message) => Err(Error::peer(message)),
            None => Ok(self.payload),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
