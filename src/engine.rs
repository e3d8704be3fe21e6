//! Streaming-sync engine seam.
//!
//! The engine that talks to the remote server is a black box to the
//! coordinator: it is constructed through an [`EngineFactory`], started
//! once, aborted on host loss or when the last tab leaves, and observed
//! through its status stream. Everything the engine needs from the
//! owning tab — credentials, credential invalidation, CRUD upload — is
//! proxied back over that tab's channel via [`ClientCallbacks`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::db::{HostDatabase, UpdateNotification};
use crate::error::Result;
use crate::protocol::{MessageKind, empty_payload};
use crate::transport::Channel;

// ============================================================================
// Constants
// ============================================================================

/// Delay between engine reconnection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

// ============================================================================
// SyncStatus
// ============================================================================

/// Serialized sync status broadcast to every connected tab.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Connected to the remote server.
    pub connected: bool,
    /// Connection attempt in progress.
    pub connecting: bool,
    /// Download stream active.
    pub downloading: bool,
    /// Upload of local writes in progress.
    pub uploading: bool,
    /// Completion time of the last full sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Last error, if the engine is retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Status for an established connection.
    #[must_use]
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }
}

// ============================================================================
// ClientCallbacks
// ============================================================================

/// Request-shaped proxies to the host tab.
///
/// Each call issues a correlated request over the owning client's
/// channel and awaits the tab's reply.
#[derive(Clone)]
pub struct ClientCallbacks {
    channel: Channel,
}

impl ClientCallbacks {
    /// Creates callbacks bound to one client's channel.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Fetches credentials from the tab.
    ///
    /// The credentials record is opaque to the coordinator.
    pub async fn credentials(&self) -> Result<Value> {
        let reply = self
            .channel
            .request(MessageKind::CredentialsCallback, empty_payload())
            .await?;
        Ok(reply.payload)
    }

    /// Tells the tab its credentials were rejected.
    pub async fn invalid_credentials(&self) -> Result<()> {
        self.channel
            .request(MessageKind::InvalidCredentialsCallback, empty_payload())
            .await?;
        Ok(())
    }

    /// Asks the tab to upload pending local writes.
    pub async fn upload_crud(&self) -> Result<()> {
        self.channel
            .request(MessageKind::UploadCrud, empty_payload())
            .await?;
        Ok(())
    }
}

impl fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCallbacks").finish_non_exhaustive()
    }
}

// ============================================================================
// EngineOptions
// ============================================================================

/// Everything an [`EngineFactory`] needs to build one engine.
pub struct EngineOptions {
    /// The runner's database identifier.
    pub identifier: String,
    /// Handle to the host tab's database.
    pub database: Arc<dyn HostDatabase>,
    /// Proxies to the host tab.
    pub callbacks: ClientCallbacks,
    /// Update notifications driving incremental sync.
    pub updates: broadcast::Receiver<UpdateNotification>,
    /// Delay between reconnection attempts.
    pub retry_delay: Duration,
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("identifier", &self.identifier)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// The downstream streaming-sync pipeline.
///
/// Exactly one engine exists per runner at any instant; the runner owns
/// it exclusively.
pub trait SyncEngine: Send + Sync {
    /// Starts the pipeline. Runs until aborted.
    fn start(&self);

    /// Aborts the pipeline and releases its resources.
    ///
    /// # Errors
    ///
    /// Abort failures are logged and swallowed by the caller; they must
    /// not prevent a state transition from completing.
    fn abort(&self) -> BoxFuture<'_, Result<()>>;

    /// Subscribes to the engine's status stream.
    fn status(&self) -> broadcast::Receiver<SyncStatus>;
}

// ============================================================================
// EngineFactory
// ============================================================================

/// Constructs engines for the supervisor.
///
/// The factory owns the remote transport configuration; the coordinator
/// only supplies the per-host options.
pub trait EngineFactory: Send + Sync {
    /// Builds a new engine.
    ///
    /// # Errors
    ///
    /// Construction failures are treated like handshake failures: the
    /// runner stays without an engine and retries on a later event.
    fn create(&self, options: EngineOptions) -> Result<Box<dyn SyncEngine>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InboundRequest, Port, Reply};
    use futures_util::FutureExt;
    use serde_json::json;

    #[test]
    fn test_status_wire_shape() {
        let status = SyncStatus::connected();
        let value = serde_json::to_value(&status).expect("serialize");
        assert_eq!(
            value,
            json!({
                "connected": true,
                "connecting": false,
                "downloading": false,
                "uploading": false,
            })
        );
    }

    #[test]
    fn test_status_with_error_roundtrip() {
        let status = SyncStatus {
            error: Some("credentials expired".into()),
            ..SyncStatus::default()
        };
        let json = serde_json::to_string(&status).expect("serialize");
        let back: SyncStatus = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, status);
    }

    #[tokio::test]
    async fn test_callbacks_proxy_over_channel() {
        let (worker_port, tab_port) = Port::pair();
        let worker_channel = Channel::new(worker_port);
        let tab_channel = Channel::new(tab_port);

        tab_channel.set_request_handler(Box::new(|request: InboundRequest| {
            async move {
                match request.kind {
                    MessageKind::CredentialsCallback => {
                        Ok(Reply::new(json!({"token": "secret", "endpoint": "https://sync"})))
                    }
                    MessageKind::UploadCrud | MessageKind::InvalidCredentialsCallback => {
                        Ok(Reply::empty())
                    }
                    other => Err(crate::Error::unknown_kind(other.as_str())),
                }
            }
            .boxed()
        }));

        let callbacks = ClientCallbacks::new(worker_channel);
        let credentials = callbacks.credentials().await.expect("credentials");
        assert_eq!(credentials["token"], "secret");
        callbacks.upload_crud().await.expect("upload");
        callbacks
            .invalid_credentials()
            .await
            .expect("invalidation ack");
    }
}
