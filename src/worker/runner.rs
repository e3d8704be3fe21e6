//! Per-database supervisor.
//!
//! A [`SyncRunner`] owns exactly one streaming-sync pipeline for its
//! database identifier, despite tabs coming and going without reliable
//! disconnect signals. All mutations of the supervised state — the
//! engine, the database host, the connection set — happen in a single
//! consumer task fed by an unbounded FIFO of [`RunnerEvent`]s; every
//! other context only enqueues.
//!
//! # State machine
//!
//! | State | engine | host | connections |
//! |-------|--------|------|-------------|
//! | Idle | ∅ | ∅ | ∅ |
//! | Electing | ∅ | ∅ | non-empty (transient, inside a transition) |
//! | Running | present | one member of connections | non-empty |
//!
//! Host loss is detected through the database handle's closed future
//! (the only reliable signal); the runner then pings every remaining
//! connection in parallel, restarts the engine with the first client
//! that answers, and marks every client whose ping times out as closed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{DatabaseConnector, DatabaseEndpoint};
use crate::engine::{ClientCallbacks, DEFAULT_RETRY_DELAY, EngineFactory, EngineOptions, SyncEngine};
use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::logging::LogBus;
use crate::protocol::{DatabaseEndpointInfo, MessageKind, empty_payload, parse_payload};

use super::client::ConnectedClient;

// ============================================================================
// Constants
// ============================================================================

/// Logger name used for records forwarded to tabs.
const RUNNER_LOGGER: &str = "SyncRunner";

// ============================================================================
// RunnerEvent
// ============================================================================

/// The closed set of events a runner reacts to.
///
/// Enqueued from any context, dequeued serially by the consumer task.
#[derive(Clone)]
pub enum RunnerEvent {
    /// A client joined the sync pipeline.
    AddConnection(ConnectedClient),
    /// A client left (abort, transport failure, or ping timeout).
    RemoveConnection(ConnectedClient),
    /// The current host's database handle reported closure.
    ActiveDatabaseClosed,
}

impl fmt::Debug for RunnerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddConnection(client) => {
                f.debug_tuple("AddConnection").field(&client.id()).finish()
            }
            Self::RemoveConnection(client) => {
                f.debug_tuple("RemoveConnection").field(&client.id()).finish()
            }
            Self::ActiveDatabaseClosed => f.write_str("ActiveDatabaseClosed"),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// State readable from outside the consumer task.
///
/// Only the consumer mutates this; producers and broadcast tasks take
/// short read locks.
#[derive(Default)]
struct RunnerShared {
    /// Currently registered clients.
    connections: FxHashMap<ClientId, ConnectedClient>,
    /// The client whose tab holds the database, when an engine runs.
    host: Option<ClientId>,
    /// Whether an engine currently exists.
    engine_active: bool,
}

/// Point-in-time view of a runner's supervised state.
#[derive(Debug, Clone)]
pub struct RunnerSnapshot {
    /// Identifiers of the registered clients.
    pub connections: Vec<ClientId>,
    /// The current database host, if any.
    pub host: Option<ClientId>,
    /// Whether an engine currently exists.
    pub engine_active: bool,
}

/// Internal shared state for a runner handle.
struct RunnerInner {
    /// Database identifier this runner supervises.
    identifier: String,
    /// Producer side of the event queue.
    events: mpsc::UnboundedSender<RunnerEvent>,
    /// State shared with the consumer task.
    shared: Arc<Mutex<RunnerShared>>,
}

// ============================================================================
// SyncRunner
// ============================================================================

/// Handle to a per-database supervisor.
///
/// Cheap to clone; the consumer task runs until the last handle is
/// dropped.
#[derive(Clone)]
pub struct SyncRunner {
    inner: Arc<RunnerInner>,
}

impl fmt::Debug for SyncRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRunner")
            .field("identifier", &self.inner.identifier)
            .finish_non_exhaustive()
    }
}

impl SyncRunner {
    /// Spawns a runner and its consumer task.
    pub(crate) fn spawn(
        identifier: impl Into<String>,
        connector: Arc<dyn DatabaseConnector>,
        engines: Arc<dyn EngineFactory>,
        logs: LogBus,
    ) -> Self {
        let identifier = identifier.into();
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(RunnerShared::default()));

        let task = RunnerTask {
            identifier: identifier.clone(),
            shared: Arc::clone(&shared),
            engine: None,
            engine_tasks: Vec::new(),
            connector,
            engines,
            logs,
            events: events.clone(),
        };
        tokio::spawn(task.run(events_rx));

        Self {
            inner: Arc::new(RunnerInner {
                identifier,
                events,
                shared,
            }),
        }
    }

    /// Returns the database identifier this runner supervises.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Enqueues registration of a client.
    pub(crate) fn register(&self, client: &ConnectedClient) {
        let _ = self
            .inner
            .events
            .send(RunnerEvent::AddConnection(client.clone()));
    }

    /// Enqueues removal of a client.
    pub(crate) fn unregister(&self, client: &ConnectedClient) {
        let _ = self
            .inner
            .events
            .send(RunnerEvent::RemoveConnection(client.clone()));
    }

    /// Returns a point-in-time view of the supervised state.
    #[must_use]
    pub fn snapshot(&self) -> RunnerSnapshot {
        let shared = self.inner.shared.lock();
        RunnerSnapshot {
            connections: shared.connections.keys().copied().collect(),
            host: shared.host,
            engine_active: shared.engine_active,
        }
    }
}

// ============================================================================
// RunnerTask
// ============================================================================

/// The consumer side of a runner: exclusive owner of the engine.
struct RunnerTask {
    /// Database identifier.
    identifier: String,
    /// State shared with the handle.
    shared: Arc<Mutex<RunnerShared>>,
    /// The at-most-one streaming-sync engine.
    engine: Option<Box<dyn SyncEngine>>,
    /// Closed-watcher and status-broadcast tasks for the engine.
    engine_tasks: Vec<JoinHandle<()>>,
    /// Opens database handles from transferred endpoints.
    connector: Arc<dyn DatabaseConnector>,
    /// Builds engines.
    engines: Arc<dyn EngineFactory>,
    /// Worker-wide log stream.
    logs: LogBus,
    /// Producer handle for the closed-watcher.
    events: mpsc::UnboundedSender<RunnerEvent>,
}

impl RunnerTask {
    /// Consumer loop; exits when every producer handle is gone.
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<RunnerEvent>) {
        debug!(identifier = %self.identifier, "Runner started");

        while let Some(event) = events.recv().await {
            let described = format!("{event:?}");
            if let Err(e) = self.handle_event(event).await {
                warn!(
                    identifier = %self.identifier,
                    event = %described,
                    error = %e,
                    "Runner transition failed"
                );
                self.logs
                    .warn(RUNNER_LOGGER, format!("{described} failed: {e}"));
            }
        }

        self.teardown_engine().await;
        debug!(identifier = %self.identifier, "Runner stopped");
    }

    /// Applies one event.
    async fn handle_event(&mut self, event: RunnerEvent) -> Result<()> {
        match event {
            RunnerEvent::AddConnection(client) => {
                debug!(identifier = %self.identifier, client_id = %client.id(), "Connection added");
                self.shared
                    .lock()
                    .connections
                    .insert(client.id(), client.clone());

                if self.engine.is_none() {
                    self.start_sync(client).await?;
                }
            }

            RunnerEvent::RemoveConnection(client) => {
                let (was_member, was_host, now_empty) = {
                    let mut shared = self.shared.lock();
                    let was_member = shared.connections.remove(&client.id()).is_some();
                    let was_host = shared.host == Some(client.id());
                    (was_member, was_host, shared.connections.is_empty())
                };

                // A client can be removed twice (markClosed is idempotent
                // but abort + port failure both enqueue).
                if !was_member {
                    return Ok(());
                }
                debug!(identifier = %self.identifier, client_id = %client.id(), "Connection removed");

                // The engine never outlives its host's registration. When
                // the host's tab actually died, the closed-watcher has
                // already enqueued `ActiveDatabaseClosed` and re-election
                // follows; a host that merely aborted leaves the remaining
                // clients engine-less until the next event.
                if now_empty || was_host {
                    self.teardown_engine().await;
                }
            }

            RunnerEvent::ActiveDatabaseClosed => {
                info!(identifier = %self.identifier, "Active database closed, electing new host");
                self.teardown_engine().await;

                let candidates: Vec<ConnectedClient> =
                    { self.shared.lock().connections.values().cloned().collect() };
                if candidates.is_empty() {
                    return Ok(());
                }

                match elect_host(candidates).await {
                    Some(winner) => self.start_sync(winner).await?,
                    None => {
                        debug!(identifier = %self.identifier, "No live candidates after election");
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds and starts the engine with `client` as database host.
    ///
    /// Runs inside the triggering transition; events arriving meanwhile
    /// stay queued.
    async fn start_sync(&mut self, client: ConnectedClient) -> Result<()> {
        // 1. Ask the client for its database endpoint.
        let reply = client
            .channel()
            .request(MessageKind::RequestDatabase, empty_payload())
            .await
            .map_err(|e| Error::handshake(format!("requestDatabase failed: {e}")))?;
        let info: DatabaseEndpointInfo = parse_payload(&reply.payload)
            .map_err(|e| Error::handshake(format!("bad requestDatabase reply: {e}")))?;
        let mut ports = reply.ports;
        if ports.is_empty() {
            return Err(Error::handshake("requestDatabase reply carried no port"));
        }
        let endpoint = DatabaseEndpoint {
            port: ports.remove(0),
            database_name: info.database_name,
            lock_name: info.lock_name,
        };

        // 2. Connect to the endpoint.
        let database = self.connector.connect(endpoint).await?;

        // 3. This client is now the host.
        self.shared.lock().host = Some(client.id());

        // 4. Watch the handle's closed future: the one reliable signal
        //    that the host tab went away.
        let closed = database.closed();
        let watch_task = {
            let client = client.clone();
            let shared = Arc::clone(&self.shared);
            let events = self.events.clone();
            tokio::spawn(async move {
                closed.await;
                debug!(client_id = %client.id(), "Host database reported closed");
                client.mark_closed();
                if shared.lock().host == Some(client.id()) {
                    let _ = events.send(RunnerEvent::ActiveDatabaseClosed);
                }
            })
        };

        // 5. Build the engine.
        let options = EngineOptions {
            identifier: self.identifier.clone(),
            updates: database.updates(),
            database,
            callbacks: ClientCallbacks::new(client.channel().clone()),
            retry_delay: DEFAULT_RETRY_DELAY,
        };
        let engine = match self.engines.create(options) {
            Ok(engine) => engine,
            Err(e) => {
                watch_task.abort();
                self.shared.lock().host = None;
                return Err(e);
            }
        };

        // 6. Broadcast every status event to the clients registered at
        //    that moment.
        let status_task = {
            let mut status_rx = engine.status();
            let shared = Arc::clone(&self.shared);
            let identifier = self.identifier.clone();
            tokio::spawn(async move {
                loop {
                    match status_rx.recv().await {
                        Ok(status) => {
                            let payload = match serde_json::to_value(&status) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(identifier = %identifier, error = %e, "Unserializable status");
                                    continue;
                                }
                            };
                            let clients: Vec<ConnectedClient> =
                                { shared.lock().connections.values().cloned().collect() };
                            for client in clients {
                                client
                                    .channel()
                                    .notify(MessageKind::NotifySyncStatus, payload.clone());
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(identifier = %identifier, skipped, "Status stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        // 7. Off it goes.
        engine.start();
        self.engine = Some(engine);
        self.engine_tasks = vec![watch_task, status_task];
        self.shared.lock().engine_active = true;

        info!(identifier = %self.identifier, host = %client.id(), "Streaming sync started");
        Ok(())
    }

    /// Aborts the engine, if any, and clears the host.
    ///
    /// An abort failure is logged and swallowed; it never blocks the
    /// transition that requested the teardown.
    async fn teardown_engine(&mut self) {
        for task in self.engine_tasks.drain(..) {
            task.abort();
        }
        {
            let mut shared = self.shared.lock();
            shared.host = None;
            shared.engine_active = false;
        }

        if let Some(engine) = self.engine.take() {
            debug!(identifier = %self.identifier, "Aborting engine");
            if let Err(e) = engine.abort().await {
                warn!(identifier = %self.identifier, error = %e, "Engine abort failed");
                self.logs
                    .warn(RUNNER_LOGGER, format!("engine abort failed: {e}"));
            }
        }
    }
}

// ============================================================================
// Election
// ============================================================================

/// Elects a new host among `candidates`.
///
/// Every candidate is pinged in parallel; the first to answer wins and
/// the election resolves without waiting for the rest. A candidate
/// whose ping fails or times out marks itself closed — independently,
/// even after the election has resolved.
async fn elect_host(candidates: Vec<ConnectedClient>) -> Option<ConnectedClient> {
    let (winner_tx, mut winner_rx) = mpsc::channel(1);

    for client in candidates {
        let winner_tx = winner_tx.clone();
        tokio::spawn(async move {
            match client.channel().ping().await {
                Ok(()) => {
                    // First responder wins; a full slot means someone beat us.
                    let _ = winner_tx.try_send(client);
                }
                Err(e) => {
                    debug!(client_id = %client.id(), error = %e, "Candidate failed election ping");
                    client.mark_closed();
                }
            }
        });
    }
    drop(winner_tx);

    // `None` once every ping has failed and dropped its sender.
    winner_rx.recv().await
}

// ============================================================================
// Tests
// ============================================================================
