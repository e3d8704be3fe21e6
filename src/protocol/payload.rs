//! Typed payloads for kinds that carry data.
//!
//! Payloads travel as JSON values inside [`WireMessage`]; these structs
//! give the handlers a typed view. Malformed payloads surface as
//! protocol errors on the offending request, never as channel failures.
//!
//! [`WireMessage`]: super::WireMessage

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Helpers
// ============================================================================

/// The empty payload `{}` used by acks and parameterless requests.
#[must_use]
pub fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Parses a payload into its typed form.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the payload does not match the
/// expected shape.
pub fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::protocol(format!("malformed payload: {e}")))
}

// ============================================================================
// StartSynchronizationParams
// ============================================================================

/// Payload of `startSynchronization`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSynchronizationParams {
    /// Identifier of the local database to synchronize.
    pub database_name: String,
}

// ============================================================================
// DatabaseEndpointInfo
// ============================================================================

/// Payload of a `requestDatabase` reply.
///
/// The database port itself is a transferable and travels alongside the
/// payload as the frame's first port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseEndpointInfo {
    /// Identifier of the database behind the port.
    pub database_name: String,
    /// Name of the lock the host tab holds on the database.
    pub lock_name: String,
}

// ============================================================================
// LogEventParams
// ============================================================================

/// Payload of a `logEvent` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEventParams {
    /// Pre-formatted log line (may span multiple lines for errors).
    pub text: String,
}

// ============================================================================
// Tests
// ============================================================================
