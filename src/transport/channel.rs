//! Request/response and notification transport over one port.
//!
//! The channel spawns an event loop task that handles:
//!
//! - Incoming frames from the peer (replies, requests, notifications)
//! - Outgoing requests and notifications from the owning component
//! - Request/reply correlation by per-channel monotonic identifier
//! - Dispatch of incoming requests to the installed [`RequestHandler`]
//!
//! Inbound `ping` requests are acknowledged by the event loop itself so
//! liveness probing never depends on application code.
//!
//! On port closure every in-flight request fails with
//! [`Error::Disconnected`] and [`Channel::closed`] resolves.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{MessageKind, WireMessage, empty_payload};

use super::port::{Frame, Port, PortSender};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a correlated request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard timeout for a liveness ping; an elapsed ping means peer-dead.
pub(crate) const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to reply channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Frame>>>;

/// An incoming request handed to the [`RequestHandler`].
#[derive(Debug)]
pub struct InboundRequest {
    /// Message kind.
    pub kind: MessageKind,
    /// Kind-specific payload.
    pub payload: Value,
    /// Ports transferred with the request.
    pub ports: Vec<Port>,
}

/// A reply payload with optional transferables.
#[derive(Debug)]
pub struct Reply {
    /// Reply payload.
    pub payload: Value,
    /// Ports transferred with the reply.
    pub ports: Vec<Port>,
}

impl Reply {
    /// Creates the empty `{}` reply.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(empty_payload())
    }

    /// Creates a reply with no transferables.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ports: Vec::new(),
        }
    }

    /// Creates a reply carrying transferable ports.
    #[must_use]
    pub fn with_ports(payload: Value, ports: Vec<Port>) -> Self {
        Self { payload, ports }
    }
}

/// Handler invoked for every incoming request.
///
/// The returned payload (and any transferables) is sent back with the
/// request's correlation identifier; a returned error becomes a failed
/// reply. The channel survives handler errors.
pub type RequestHandler =
    Box<dyn Fn(InboundRequest) -> BoxFuture<'static, Result<Reply>> + Send + Sync>;

// ============================================================================
// ChannelCommand
// ============================================================================

/// Internal commands for the event loop.
enum ChannelCommand {
    /// Send a request and correlate the reply.
    Send {
        message: WireMessage,
        ports: Vec<Port>,
        response_tx: oneshot::Sender<Result<Frame>>,
    },
    /// Send a one-way notification.
    Notify { message: WireMessage },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Shut the channel down.
    Shutdown,
}

// ============================================================================
// Channel
// ============================================================================

/// Bidirectional request/response + notification transport over one port.
///
/// Cheap to clone; all clones share the same event loop and correlation
/// state.
#[derive(Clone)]
pub struct Channel {
    /// Commands to the event loop.
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Correlation map (shared with the event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Installed request handler (shared with the event loop).
    handler: Arc<Mutex<Option<Arc<RequestHandler>>>>,
    /// Next correlation identifier.
    next_id: Arc<AtomicU64>,
    /// Becomes `true` when the event loop terminates.
    closed_rx: watch::Receiver<bool>,
}

impl Channel {
    /// Binds a channel to a port and spawns its event loop.
    #[must_use]
    pub fn new(port: Port) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let handler: Arc<Mutex<Option<Arc<RequestHandler>>>> = Arc::new(Mutex::new(None));
        let (closed_tx, closed_rx) = watch::channel(false);

        tokio::spawn(Self::run_event_loop(
            port,
            command_rx,
            Arc::clone(&correlation),
            Arc::clone(&handler),
            closed_tx,
        ));

        Self {
            command_tx,
            correlation,
            handler,
            next_id: Arc::new(AtomicU64::new(1)),
            closed_rx,
        }
    }

    /// Installs the request handler for the server role.
    ///
    /// Requests arriving while no handler is installed fail with a
    /// protocol error reply.
    pub fn set_request_handler(&self, handler: RequestHandler) {
        let mut guard = self.handler.lock();
        *guard = Some(Arc::new(handler));
    }

    /// Issues a correlated request with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Disconnected`] if the port is closed
    /// - [`Error::Peer`] if the peer replied with an error
    /// - [`Error::RequestTimeout`] if no reply arrived in time
    /// - [`Error::TooManyRequests`] if the in-flight limit is reached
    pub async fn request(&self, kind: MessageKind, payload: Value) -> Result<Reply> {
        self.request_with_timeout(kind, payload, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Issues a correlated request with a custom timeout.
    ///
    /// # Errors
    ///
    /// See [`Channel::request`].
    pub async fn request_with_timeout(
        &self,
        kind: MessageKind,
        payload: Value,
        request_timeout: Duration,
    ) -> Result<Reply> {
        // Check pending request limit.
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::TooManyRequests {
                    pending: correlation.len(),
                    max: MAX_PENDING_REQUESTS,
                });
            }
        }

        let request_id = RequestId::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed));
        let message = WireMessage::request(kind, request_id, payload);

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ChannelCommand::Send {
                message,
                ports: Vec::new(),
                response_tx,
            })
            .map_err(|_| Error::Disconnected)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => {
                let frame = result?;
                let ports = frame.ports;
                let payload = frame.message.into_reply_payload()?;
                Ok(Reply { payload, ports })
            }
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                // Timeout; clean up the correlation entry.
                let _ = self
                    .command_tx
                    .send(ChannelCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Sends a one-way notification; never fails observably.
    pub fn notify(&self, kind: MessageKind, payload: Value) {
        let message = WireMessage::notification(kind, payload);
        let _ = self.command_tx.send(ChannelCommand::Notify { message });
    }

    /// Issues a liveness ping with a hard 5-second timeout.
    ///
    /// # Errors
    ///
    /// Any error means the peer must be considered dead.
    pub async fn ping(&self) -> Result<()> {
        self.request_with_timeout(MessageKind::Ping, empty_payload(), PING_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Returns the number of requests awaiting replies.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` once the channel's event loop has terminated.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves when the channel closes (port dropped or shut down).
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Shuts the channel down, failing all in-flight requests.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown);
    }
}

// ============================================================================
// Channel - Event Loop
// ============================================================================

impl Channel {
    /// Event loop handling port I/O and commands.
    async fn run_event_loop(
        port: Port,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        handler: Arc<Mutex<Option<Arc<RequestHandler>>>>,
        closed_tx: watch::Sender<bool>,
    ) {
        let (sender, mut port_rx) = port.split();

        loop {
            tokio::select! {
                // Incoming frames from the peer.
                frame = port_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            Self::handle_incoming(frame, &sender, &correlation, &handler);
                        }
                        None => {
                            debug!("Port closed by peer");
                            break;
                        }
                    }
                }

                // Commands from the owning component.
                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Send { message, ports, response_tx }) => {
                            Self::handle_send(message, ports, response_tx, &sender, &correlation);
                        }

                        Some(ChannelCommand::Notify { message }) => {
                            if sender.send(Frame::new(message)).is_err() {
                                debug!("Notification dropped: port closed");
                            }
                        }

                        Some(ChannelCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(ChannelCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Fail all pending requests on shutdown.
        Self::fail_pending_requests(&correlation);
        let _ = closed_tx.send(true);

        debug!("Channel event loop terminated");
    }

    /// Handles one incoming frame.
    fn handle_incoming(
        frame: Frame,
        sender: &PortSender,
        correlation: &Arc<Mutex<CorrelationMap>>,
        handler: &Arc<Mutex<Option<Arc<RequestHandler>>>>,
    ) {
        let message = &frame.message;

        if message.is_reply {
            let Some(request_id) = message.correlation_id else {
                warn!(kind = %message.kind, "Reply without correlation identifier");
                return;
            };
            let tx = correlation.lock().remove(&request_id);
            if let Some(tx) = tx {
                let _ = tx.send(Ok(frame));
            } else {
                warn!(%request_id, "Reply for unknown request");
            }
            return;
        }

        if message.is_request() {
            let kind = message.kind;
            let request_id = message
                .correlation_id
                .unwrap_or_else(|| RequestId::from_u64(0));

            // The channel acknowledges pings itself; liveness must not
            // depend on the installed handler.
            if kind == MessageKind::Ping {
                trace!(%request_id, "Ping acknowledged");
                let reply = WireMessage::reply(kind, request_id, empty_payload());
                let _ = sender.send(Frame::new(reply));
                return;
            }

            let installed = handler.lock().clone();
            let request = InboundRequest {
                kind,
                payload: frame.message.payload,
                ports: frame.ports,
            };
            let sender = sender.clone();

            tokio::spawn(async move {
                let outcome = match installed {
                    Some(handler) => handler(request).await,
                    None => Err(Error::protocol("no request handler installed")),
                };

                let reply = match outcome {
                    Ok(reply) => Frame::with_ports(
                        WireMessage::reply(kind, request_id, reply.payload),
                        reply.ports,
                    ),
                    Err(e) => {
                        debug!(%request_id, kind = %kind, error = %e, "Request failed");
                        Frame::new(WireMessage::error_reply(kind, request_id, e.to_string()))
                    }
                };

                if sender.send(reply).is_err() {
                    debug!(%request_id, "Reply dropped: port closed");
                }
            });
            return;
        }

        // The worker side defines no inbound notifications.
        trace!(kind = %message.kind, "Ignoring inbound notification");
    }

    /// Handles an outgoing request.
    fn handle_send(
        message: WireMessage,
        ports: Vec<Port>,
        response_tx: oneshot::Sender<Result<Frame>>,
        sender: &PortSender,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) {
        let Some(request_id) = message.correlation_id else {
            let _ = response_tx.send(Err(Error::protocol("request without correlation")));
            return;
        };

        // Store correlation before sending.
        correlation.lock().insert(request_id, response_tx);

        if sender.send(Frame::with_ports(message, ports)).is_err() {
            if let Some(tx) = correlation.lock().remove(&request_id) {
                let _ = tx.send(Err(Error::Disconnected));
            }
            return;
        }

        trace!(%request_id, "Request sent");
    }

    /// Fails all pending requests with [`Error::Disconnected`].
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = {
            let mut map = correlation.lock();
            map.drain().collect()
        };
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::Disconnected));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
