//! Per-tab session object.
//!
//! A [`ConnectedClient`] represents one tab for the lifetime of its
//! port. It owns the tab's [`Channel`], answers the tab's control
//! requests, forwards the worker-wide log stream, and routes itself in
//! and out of the [`SyncRunner`] owning its database.
//!
//! [`SyncRunner`]: super::SyncRunner

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::logging::LogRecord;
use crate::protocol::{
    LogEventParams, MessageKind, StartSynchronizationParams, parse_payload,
};
use crate::transport::{Channel, InboundRequest, Port, Reply};

use super::Worker;
use super::runner::SyncRunner;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for a connected client.
struct ClientInner {
    /// Unique identity of this tab connection.
    id: ClientId,
    /// Channel bound to the tab's port.
    channel: Channel,
    /// The worker root; weak, the root outlives its clients anyway.
    worker: Weak<Worker>,
    /// The runner this client registered with, if any.
    runner: Mutex<Option<SyncRunner>>,
    /// Log-forwarding task, cancelled on close.
    log_task: Mutex<Option<JoinHandle<()>>>,
    /// Set once by the first `mark_closed`.
    closed: AtomicBool,
}

// ============================================================================
// ConnectedClient
// ============================================================================

/// Handle to one tab's session.
///
/// Shared between the worker root and the runner's connection set;
/// neither keeps the session alive beyond [`mark_closed`]
/// (`mark_closed` clears the runner reference, breaking the cycle).
///
/// [`mark_closed`]: ConnectedClient::mark_closed
#[derive(Clone)]
pub struct ConnectedClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ConnectedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectedClient - Constructor
// ============================================================================

impl ConnectedClient {
    /// Binds a new client to a port.
    ///
    /// Installs the control-request handler, starts forwarding the
    /// worker-wide log stream, and watches the channel for closure.
    pub(crate) fn attach(port: Port, worker: &Arc<Worker>) -> Self {
        let channel = Channel::new(port);
        let client = Self {
            inner: Arc::new(ClientInner {
                id: ClientId::generate(),
                channel: channel.clone(),
                worker: Arc::downgrade(worker),
                runner: Mutex::new(None),
                log_task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };

        client.install_request_handler();
        client.spawn_log_forwarder(worker.logs().subscribe());
        client.spawn_close_watcher();

        debug!(client_id = %client.id(), "Client connected");
        client
    }

    /// Installs the handler for the tab's control requests.
    ///
    /// Exactly two kinds are accepted; everything else fails the
    /// request with a protocol error (pings are acknowledged by the
    /// channel itself).
    fn install_request_handler(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .channel
            .set_request_handler(Box::new(move |request: InboundRequest| {
                let weak = weak.clone();
                async move {
                    let client = ConnectedClient {
                        inner: weak.upgrade().ok_or(Error::Disconnected)?,
                    };
                    match request.kind {
                        MessageKind::StartSynchronization => {
                            let params: StartSynchronizationParams =
                                parse_payload(&request.payload)?;
                            client.start_synchronization(params.database_name)?;
                            Ok(Reply::empty())
                        }
                        MessageKind::AbortSynchronization => {
                            client.abort_synchronization();
                            Ok(Reply::empty())
                        }
                        other => Err(Error::unknown_kind(other.as_str())),
                    }
                }
                .boxed()
            }));
    }

    /// Forwards every log record to the tab as a `logEvent` notification.
    ///
    /// A lagging subscription drops records instead of blocking the
    /// stream.
    fn spawn_log_forwarder(&self, mut records: broadcast::Receiver<LogRecord>) {
        let channel = self.inner.channel.clone();
        let task = tokio::spawn(async move {
            loop {
                match records.recv().await {
                    Ok(record) => {
                        let params = LogEventParams {
                            text: record.format_line(),
                        };
                        if let Ok(payload) = serde_json::to_value(&params) {
                            channel.notify(MessageKind::LogEvent, payload);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Log subscription lagged, records dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.inner.log_task.lock() = Some(task);
    }

    /// Marks the client closed once its port dies.
    fn spawn_close_watcher(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            client.inner.channel.closed().await;
            client.mark_closed();
        });
    }
}

// ============================================================================
// ConnectedClient - Accessors
// ============================================================================

impl ConnectedClient {
    /// Returns this client's identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    /// Returns the channel to the tab.
    #[inline]
    #[must_use]
    pub(crate) fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Returns `true` once the client has been marked closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ConnectedClient - Control
// ============================================================================

impl ConnectedClient {
    /// Handles `startSynchronization`: resolve the runner, store it,
    /// registration happens inside [`Worker::reference_sync_task`].
    fn start_synchronization(&self, database_name: String) -> Result<()> {
        let worker = self
            .inner
            .worker
            .upgrade()
            .ok_or_else(|| Error::protocol("worker root is gone"))?;

        // Switching databases leaves the previous runner first; it must
        // not keep this client in its connection set. Re-starting the
        // same database just re-registers with the same runner.
        let previous = self.inner.runner.lock().take();
        if let Some(previous) = previous
            && previous.identifier() != database_name
        {
            debug!(
                client_id = %self.id(),
                identifier = %previous.identifier(),
                "Client switched databases, leaving previous runner"
            );
            previous.unregister(self);
        }

        let runner = worker.reference_sync_task(&database_name, self);
        *self.inner.runner.lock() = Some(runner);
        Ok(())
    }

    /// Handles `abortSynchronization`: leave the runner, if any.
    fn abort_synchronization(&self) {
        if let Some(runner) = self.inner.runner.lock().take() {
            debug!(client_id = %self.id(), identifier = %runner.identifier(), "Client aborted sync");
            runner.unregister(self);
        }
    }

    /// Destroys the session.
    ///
    /// Cancels the log subscription, unregisters from the runner, and
    /// shuts the channel down. Safe to call more than once.
    pub fn mark_closed(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(client_id = %self.id(), "Client closed");

        if let Some(task) = self.inner.log_task.lock().take() {
            task.abort();
        }
        if let Some(runner) = self.inner.runner.lock().take() {
            runner.unregister(self);
        }
        if let Some(worker) = self.inner.worker.upgrade() {
            worker.forget_client(self.id());
        }
        self.inner.channel.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
