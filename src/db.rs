//! Local-database seam.
//!
//! The worker never owns a database. The host tab holds the real
//! database behind a lock and hands the worker a transferred endpoint;
//! a [`DatabaseConnector`] turns that endpoint into a [`HostDatabase`]
//! handle. Schema migration and pragma setup are the host's business
//! and happen before the endpoint is handed over.
//!
//! The handle's [`closed`](HostDatabase::closed) future is the single
//! reliable disconnect signal in the system: it resolves when the host
//! tab goes away, and the supervisor uses it to trigger failover.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::transport::Port;

// ============================================================================
// DatabaseEndpoint
// ============================================================================

/// A transferred database endpoint received from a host tab.
///
/// Produced from a `requestDatabase` reply: the port is the frame's
/// transferable, the names come from the payload.
pub struct DatabaseEndpoint {
    /// Port to the host tab's database.
    pub port: Port,
    /// Identifier of the database behind the port.
    pub database_name: String,
    /// Name of the lock the host tab holds on the database.
    pub lock_name: String,
}

impl fmt::Debug for DatabaseEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseEndpoint")
            .field("database_name", &self.database_name)
            .field("lock_name", &self.lock_name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// UpdateNotification
// ============================================================================

/// One batch of table-change notifications from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNotification {
    /// Names of the tables that changed.
    pub tables: Vec<String>,
}

// ============================================================================
// HostDatabase
// ============================================================================

/// A connected handle to the host tab's database.
pub trait HostDatabase: Send + Sync {
    /// Resolves when the host tab goes away.
    ///
    /// This is the only reliable disconnect signal for a client; the
    /// supervisor watches it for the current host only.
    fn closed(&self) -> BoxFuture<'static, ()>;

    /// Subscribes to the database's update notifications.
    fn updates(&self) -> broadcast::Receiver<UpdateNotification>;
}

// ============================================================================
// DatabaseConnector
// ============================================================================

/// Opens a [`HostDatabase`] handle from a transferred endpoint.
pub trait DatabaseConnector: Send + Sync {
    /// Connects to the endpoint.
    ///
    /// # Errors
    ///
    /// Connection failures surface as handshake errors; the supervisor
    /// logs them and retries on a later event.
    fn connect(&self, endpoint: DatabaseEndpoint)
    -> BoxFuture<'static, Result<Arc<dyn HostDatabase>>>;
}

// ============================================================================
// Tests
// ============================================================================
