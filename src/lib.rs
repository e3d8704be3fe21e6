//! Cross-tab sync coordinator.
//!
//! One shared worker, reachable from every tab of an origin over a
//! duplex message port, owns exactly one live streaming-sync pipeline
//! per local database on behalf of all tabs using that database.
//!
//! # Architecture
//!
//! ```text
//! tab ──► port ──► Channel ──► ConnectedClient ──► SyncRunner queue
//!                                                        │
//!                                      (engine ◄──► remote server)
//!                                                        │
//! tab ◄── port ◄── Channel ◄────── status broadcast ◄────┘
//! ```
//!
//! Key design principles:
//!
//! - Each [`SyncRunner`] serializes every mutation of its supervised
//!   state through a single event-queue consumer; producers only
//!   enqueue. No other synchronization is required.
//! - One tab is elected *database host*; the worker reaches the local
//!   database only through the endpoint that tab transfers over.
//! - The runtime has no reliable disconnect signal, so liveness is
//!   probed with hard-timeout pings and the host's database handle is
//!   watched for closure to drive failover.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_coordinator::{ConnectEvent, LogBus, Port, Worker, WorkerOptions};
//!
//! let worker = Worker::new(WorkerOptions {
//!     connector,          // Arc<dyn DatabaseConnector>
//!     engines,            // Arc<dyn EngineFactory>
//!     logs: LogBus::new(),
//! });
//!
//! // Bootstrap: every new tab hands the worker one port end.
//! let (tab_port, worker_port) = Port::pair();
//! worker.connect(ConnectEvent { ports: vec![worker_port] });
//! // The tab then drives the session over `tab_port`:
//! //   startSynchronization{databaseName} / abortSynchronization / ping
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`worker`] | Worker root, per-tab clients, per-database supervisors |
//! | [`transport`] | Message ports and the request/response channel |
//! | [`protocol`] | Message kinds, wire frames, typed payloads |
//! | [`engine`] | Streaming-sync engine seam and status types |
//! | [`db`] | Local-database seam (endpoint, handle, connector) |
//! | [`logging`] | Worker-wide log stream forwarded to tabs |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Local-database seam: endpoint, handle, connector.
pub mod db;

/// Streaming-sync engine seam and status types.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for coordinator entities.
pub mod identifiers;

/// Worker-wide log stream forwarded to tabs.
pub mod logging;

/// Message kinds, wire frames, and typed payloads.
pub mod protocol;

/// Message-port transport layer.
pub mod transport;

/// Worker root, per-tab clients, per-database supervisors.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

// Worker types
pub use worker::{
    ConnectEvent, ConnectedClient, RunnerEvent, RunnerSnapshot, SyncRunner, Worker, WorkerOptions,
};

// Transport types
pub use transport::{Channel, Frame, InboundRequest, Port, Reply, RequestHandler};

// Protocol types
pub use protocol::{
    DatabaseEndpointInfo, LogEventParams, MessageKind, StartSynchronizationParams, WireMessage,
};

// Engine types
pub use engine::{
    ClientCallbacks, DEFAULT_RETRY_DELAY, EngineFactory, EngineOptions, SyncEngine, SyncStatus,
};

// Database types
pub use db::{DatabaseConnector, DatabaseEndpoint, HostDatabase, UpdateNotification};

// Logging types
pub use logging::{LogBus, LogLevel, LogRecord};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ClientId, RequestId};
