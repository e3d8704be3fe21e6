//! The shared worker: root, per-tab clients, per-database supervisors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Worker (root)                        │
//! │                                                              │
//! │  ConnectEvent ──► ConnectedClient (one per port)             │
//! │                        │  startSynchronization{db}           │
//! │                        ▼                                     │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ "db1" → SyncRunner ── event queue ── engine + host     │  │
//! │  │ "db2" → SyncRunner ── event queue ── engine + host     │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow: tab → port → channel → client → runner event queue →
//! (engine ↔ remote) → status broadcast → channels → tabs.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Per-tab session object |
//! | `runner` | Per-database supervisor and host election |

// ============================================================================
// Submodules
// ============================================================================

/// Per-tab session object.
pub mod client;

/// Per-database supervisor.
pub mod runner;

#[cfg(test)]
pub(crate) mod harness;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::ConnectedClient;
pub use runner::{RunnerEvent, RunnerSnapshot, SyncRunner};

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::db::DatabaseConnector;
use crate::engine::EngineFactory;
use crate::identifiers::ClientId;
use crate::logging::LogBus;
use crate::transport::Port;

// ============================================================================
// WorkerOptions
// ============================================================================

/// Collaborators injected into the worker root.
pub struct WorkerOptions {
    /// Opens database handles from transferred endpoints.
    pub connector: Arc<dyn DatabaseConnector>,
    /// Builds streaming-sync engines.
    pub engines: Arc<dyn EngineFactory>,
    /// Worker-wide log stream forwarded to every tab.
    pub logs: LogBus,
}

// ============================================================================
// ConnectEvent
// ============================================================================

/// One connection event from the worker's global scope.
///
/// Each event carries one or more ports; every port yields one
/// [`ConnectedClient`].
#[derive(Debug)]
pub struct ConnectEvent {
    /// Ports to newly connected tabs.
    pub ports: Vec<Port>,
}

// ============================================================================
// Worker
// ============================================================================

/// The worker root: accepts connections and owns the runner map.
///
/// Runners are created on demand and persist for the worker's lifetime,
/// even when idle.
pub struct Worker {
    /// Opens database handles from transferred endpoints.
    connector: Arc<dyn DatabaseConnector>,
    /// Builds streaming-sync engines.
    engines: Arc<dyn EngineFactory>,
    /// Worker-wide log stream.
    logs: LogBus,
    /// Supervisors keyed by database identifier.
    runners: Mutex<FxHashMap<String, SyncRunner>>,
    /// Live clients, for observability; entries leave on close.
    clients: Mutex<FxHashMap<ClientId, ConnectedClient>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("runners", &self.runner_count())
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker - Constructor
// ============================================================================

impl Worker {
    /// Creates a worker root.
    #[must_use]
    pub fn new(options: WorkerOptions) -> Arc<Self> {
        Arc::new(Self {
            connector: options.connector,
            engines: options.engines,
            logs: options.logs,
            runners: Mutex::new(FxHashMap::default()),
            clients: Mutex::new(FxHashMap::default()),
        })
    }
}

// ============================================================================
// Worker - Connections
// ============================================================================

impl Worker {
    /// Handles one connection event: every port becomes a client.
    pub fn connect(self: &Arc<Self>, event: ConnectEvent) {
        for port in event.ports {
            let client = ConnectedClient::attach(port, self);
            self.clients.lock().insert(client.id(), client);
        }
    }

    /// Drives a stream of connection events until it ends.
    pub fn listen(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ConnectEvent>,
    ) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                worker.connect(event);
            }
            debug!("Connection stream ended");
        })
    }

    /// Forgets a closed client.
    pub(crate) fn forget_client(&self, id: ClientId) {
        self.clients.lock().remove(&id);
    }
}

// ============================================================================
// Worker - Runners
// ============================================================================

impl Worker {
    /// Returns the runner for `identifier`, creating it on first use,
    /// and registers `client` with it.
    pub fn reference_sync_task(&self, identifier: &str, client: &ConnectedClient) -> SyncRunner {
        let runner = {
            let mut runners = self.runners.lock();
            runners
                .entry(identifier.to_string())
                .or_insert_with(|| {
                    info!(identifier, "Creating sync runner");
                    SyncRunner::spawn(
                        identifier,
                        Arc::clone(&self.connector),
                        Arc::clone(&self.engines),
                        self.logs.clone(),
                    )
                })
                .clone()
        };
        runner.register(client);
        runner
    }

    /// Returns the runner for `identifier`, if one was ever created.
    #[must_use]
    pub fn runner(&self, identifier: &str) -> Option<SyncRunner> {
        self.runners.lock().get(identifier).cloned()
    }
}

// ============================================================================
// Worker - Observability
// ============================================================================

impl Worker {
    /// Returns the number of runners ever created.
    #[inline]
    #[must_use]
    pub fn runner_count(&self) -> usize {
        self.runners.lock().len()
    }

    /// Returns the number of live clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns handles to the live clients.
    #[must_use]
    pub fn client_handles(&self) -> Vec<ConnectedClient> {
        self.clients.lock().values().cloned().collect()
    }

    /// Returns the worker-wide log stream.
    #[inline]
    #[must_use]
    pub fn logs(&self) -> &LogBus {
        &self.logs
    }
}

// ============================================================================
// Tests
// ============================================================================
