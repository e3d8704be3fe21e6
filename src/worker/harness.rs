//! In-process test doubles for the worker tests.
//!
//! [`TestTab`] speaks the raw frame protocol over its own port end, so
//! the tests exercise the same wire shapes a real tab would produce —
//! including a tab that goes silent without closing its port, the one
//! failure mode the transport cannot observe.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::db::{DatabaseConnector, DatabaseEndpoint, HostDatabase, UpdateNotification};
use crate::engine::{EngineFactory, EngineOptions, SyncEngine, SyncStatus};
use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::logging::LogBus;
use crate::protocol::{DatabaseEndpointInfo, MessageKind, WireMessage, empty_payload};
use crate::transport::port::PortSender;
use crate::transport::{Frame, Port};

use super::{ConnectEvent, SyncRunner, Worker, WorkerOptions};

// ============================================================================
// wait_until
// ============================================================================

/// Polls `condition` until it holds, panicking after 10 seconds.
///
/// Under a paused clock the sleeps auto-advance, so timer-driven
/// conditions (like the 5-second ping timeout) resolve immediately.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// ============================================================================
// FakeDatabase
// ============================================================================

/// Database handle whose closure the test controls.
pub(crate) struct FakeDatabase {
    closed_tx: watch::Sender<bool>,
    updates_tx: broadcast::Sender<UpdateNotification>,
}

impl FakeDatabase {
    fn new() -> Self {
        let (closed_tx, _) = watch::channel(false);
        let (updates_tx, _) = broadcast::channel(8);
        Self {
            closed_tx,
            updates_tx,
        }
    }

    /// Simulates the host tab going away.
    pub(crate) fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

impl HostDatabase for FakeDatabase {
    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.closed_tx.subscribe();
        async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
        .boxed()
    }

    fn updates(&self) -> broadcast::Receiver<UpdateNotification> {
        self.updates_tx.subscribe()
    }
}

// ============================================================================
// FakeConnector
// ============================================================================

/// Connector that records every opened database by its lock name.
pub(crate) struct FakeConnector {
    databases: Mutex<FxHashMap<String, Arc<FakeDatabase>>>,
}

impl FakeConnector {
    fn new() -> Self {
        Self {
            databases: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the database opened for `lock_name`.
    pub(crate) fn database(&self, lock_name: &str) -> Arc<FakeDatabase> {
        self.databases
            .lock()
            .get(lock_name)
            .cloned()
            .expect("no database opened for lock")
    }
}

impl DatabaseConnector for FakeConnector {
    fn connect(
        &self,
        endpoint: DatabaseEndpoint,
    ) -> BoxFuture<'static, Result<Arc<dyn HostDatabase>>> {
        let database = Arc::new(FakeDatabase::new());
        self.databases
            .lock()
            .insert(endpoint.lock_name, Arc::clone(&database));
        async move { Ok(database as Arc<dyn HostDatabase>) }.boxed()
    }
}

// ============================================================================
// FakeEngine
// ============================================================================

/// Counters and status feed shared between a fake engine and its test.
pub(crate) struct EngineProbe {
    start_count: AtomicUsize,
    abort_count: AtomicUsize,
    status_tx: broadcast::Sender<SyncStatus>,
}

impl EngineProbe {
    /// Feeds a status event into the engine's stream.
    pub(crate) fn emit(&self, status: SyncStatus) {
        let _ = self.status_tx.send(status);
    }

    pub(crate) fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    pub(crate) fn abort_count(&self) -> usize {
        self.abort_count.load(Ordering::SeqCst)
    }
}

/// Engine that only records what the supervisor does to it.
struct FakeEngine {
    probe: Arc<EngineProbe>,
    // Holds the database handle and callbacks alive, as a real engine would.
    _options: EngineOptions,
}

impl SyncEngine for FakeEngine {
    fn start(&self) {
        self.probe.start_count.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.probe.abort_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn status(&self) -> broadcast::Receiver<SyncStatus> {
        self.probe.status_tx.subscribe()
    }
}

/// Factory recording every engine it builds.
pub(crate) struct FakeEngineFactory {
    created: Mutex<Vec<Arc<EngineProbe>>>,
    create_attempts: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeEngineFactory {
    fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            create_attempts: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Makes the next `create` call fail.
    pub(crate) fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Returns how many times `create` was called, failures included.
    pub(crate) fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Returns how many engines were ever built.
    pub(crate) fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Returns the probe of the most recently built engine.
    pub(crate) fn last(&self) -> Arc<EngineProbe> {
        self.created.lock().last().cloned().expect("no engine created")
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self, options: EngineOptions) -> Result<Box<dyn SyncEngine>> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::engine("injected construction failure"));
        }
        let (status_tx, _) = broadcast::channel(16);
        let probe = Arc::new(EngineProbe {
            start_count: AtomicUsize::new(0),
            abort_count: AtomicUsize::new(0),
            status_tx,
        });
        self.created.lock().push(Arc::clone(&probe));
        Ok(Box::new(FakeEngine {
            probe,
            _options: options,
        }))
    }
}

// ============================================================================
// TestHarness
// ============================================================================

/// A worker wired to fakes, plus handles to every fake.
pub(crate) struct TestHarness {
    worker: Arc<Worker>,
    connector: Arc<FakeConnector>,
    engines: Arc<FakeEngineFactory>,
    logs: LogBus,
}

impl TestHarness {
    pub(crate) fn new() -> Self {
        let connector = Arc::new(FakeConnector::new());
        let engines = Arc::new(FakeEngineFactory::new());
        let logs = LogBus::new();
        let worker = Worker::new(WorkerOptions {
            connector: Arc::clone(&connector) as Arc<dyn DatabaseConnector>,
            engines: Arc::clone(&engines) as Arc<dyn EngineFactory>,
            logs: logs.clone(),
        });
        Self {
            worker,
            connector,
            engines,
            logs,
        }
    }

    pub(crate) fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Returns the runner for `identifier`, which must exist.
    pub(crate) fn runner(&self, identifier: &str) -> SyncRunner {
        self.worker.runner(identifier).expect("runner not created")
    }

    pub(crate) fn connector(&self) -> &FakeConnector {
        &self.connector
    }

    pub(crate) fn engines(&self) -> &FakeEngineFactory {
        &self.engines
    }

    pub(crate) fn logs(&self) -> &LogBus {
        &self.logs
    }
}

// ============================================================================
// TestTab
// ============================================================================

/// Internal state of a simulated tab.
struct TabInner {
    name: String,
    sender: PortSender,
    database: Mutex<String>,
    next_id: AtomicU64,
    pending: Mutex<FxHashMap<RequestId, oneshot::Sender<WireMessage>>>,
    statuses: Mutex<Vec<SyncStatus>>,
    log_lines: Mutex<Vec<String>>,
    silent: AtomicBool,
    db_requests: AtomicUsize,
    held_ports: Mutex<Vec<Port>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A simulated tab speaking raw frames over its port end.
pub(crate) struct TestTab {
    inner: Arc<TabInner>,
}

impl TestTab {
    /// Creates a tab and the worker-side port to hand to a worker.
    pub(crate) fn with_port(name: &str) -> (Self, Port) {
        let (tab_port, worker_port) = Port::pair();
        (Self::spawn(tab_port, name), worker_port)
    }

    /// Creates a tab and connects it to `worker`.
    pub(crate) fn connect(worker: &Arc<Worker>, name: &str) -> Self {
        let (tab, port) = Self::with_port(name);
        worker.connect(ConnectEvent { ports: vec![port] });
        tab
    }

    fn spawn(port: Port, name: &str) -> Self {
        let (sender, mut rx) = port.split();
        let inner = Arc::new(TabInner {
            name: name.to_string(),
            sender,
            database: Mutex::new("db".to_string()),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(FxHashMap::default()),
            statuses: Mutex::new(Vec::new()),
            log_lines: Mutex::new(Vec::new()),
            silent: AtomicBool::new(false),
            db_requests: AtomicUsize::new(0),
            held_ports: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        });

        let loop_inner = Arc::clone(&inner);
        let task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                loop_inner.handle_frame(frame);
            }
        });
        *inner.task.lock() = Some(task);

        Self { inner }
    }

    /// Issues a raw request and waits for the worker's reply message.
    pub(crate) async fn request(&self, kind: MessageKind, payload: Value) -> Result<WireMessage> {
        let id = RequestId::from_u64(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);
        self.inner
            .sender
            .send(Frame::new(WireMessage::request(kind, id, payload)))?;
        // The worker side fails in-flight requests by dropping them.
        rx.await.map_err(|_| Error::Disconnected)
    }

    /// Sends `startSynchronization` and asserts it is accepted.
    pub(crate) async fn start_sync(&self, database: &str) {
        *self.inner.database.lock() = database.to_string();
        let reply = self
            .request(
                MessageKind::StartSynchronization,
                json!({ "databaseName": database }),
            )
            .await
            .expect("startSynchronization reply");
        assert!(reply.error.is_none(), "start failed: {:?}", reply.error);
    }

    /// Sends `abortSynchronization` and asserts it is accepted.
    pub(crate) async fn abort_sync(&self) {
        let reply = self
            .request(MessageKind::AbortSynchronization, empty_payload())
            .await
            .expect("abortSynchronization reply");
        assert!(reply.error.is_none(), "abort failed: {:?}", reply.error);
    }

    /// Pings the worker.
    pub(crate) async fn ping(&self) -> Result<WireMessage> {
        self.request(MessageKind::Ping, empty_payload()).await
    }

    /// Stops reacting to anything while keeping the port open.
    ///
    /// From the worker's perspective the tab is alive but will never
    /// answer another ping.
    pub(crate) fn go_silent(&self) {
        self.inner.silent.store(true, Ordering::SeqCst);
    }

    /// Closes the tab's port end.
    pub(crate) fn disconnect(self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }

    /// Statuses received so far.
    pub(crate) fn statuses(&self) -> Vec<SyncStatus> {
        self.inner.statuses.lock().clone()
    }

    /// Forwarded log lines received so far.
    pub(crate) fn log_lines(&self) -> Vec<String> {
        self.inner.log_lines.lock().clone()
    }

    /// How many times the worker asked this tab for its database.
    pub(crate) fn database_requests(&self) -> usize {
        self.inner.db_requests.load(Ordering::SeqCst)
    }
}

impl TabInner {
    /// Reacts to one frame from the worker.
    fn handle_frame(&self, frame: Frame) {
        if self.silent.load(Ordering::SeqCst) {
            return;
        }
        let message = frame.message;

        if message.is_reply {
            if let Some(id) = message.correlation_id
                && let Some(tx) = self.pending.lock().remove(&id)
            {
                let _ = tx.send(message);
            }
            return;
        }

        if message.is_request() {
            let Some(id) = message.correlation_id else {
                return;
            };
            let reply = match message.kind {
                MessageKind::Ping => {
                    Frame::new(WireMessage::reply(MessageKind::Ping, id, empty_payload()))
                }
                MessageKind::RequestDatabase => {
                    self.db_requests.fetch_add(1, Ordering::SeqCst);
                    let (held, transferred) = Port::pair();
                    self.held_ports.lock().push(held);
                    let info = DatabaseEndpointInfo {
                        database_name: self.database.lock().clone(),
                        lock_name: format!("lock-{}", self.name),
                    };
                    let payload = serde_json::to_value(&info).expect("serialize endpoint");
                    Frame::with_ports(
                        WireMessage::reply(MessageKind::RequestDatabase, id, payload),
                        vec![transferred],
                    )
                }
                MessageKind::CredentialsCallback => Frame::new(WireMessage::reply(
                    MessageKind::CredentialsCallback,
                    id,
                    json!({ "token": "tab-token" }),
                )),
                MessageKind::UploadCrud | MessageKind::InvalidCredentialsCallback => {
                    Frame::new(WireMessage::reply(message.kind, id, empty_payload()))
                }
                other => Frame::new(WireMessage::error_reply(other, id, "unexpected request")),
            };
            let _ = self.sender.send(reply);
            return;
        }

        match message.kind {
            MessageKind::NotifySyncStatus => {
                if let Ok(status) = serde_json::from_value::<SyncStatus>(message.payload) {
                    self.statuses.lock().push(status);
                }
            }
            MessageKind::LogEvent => {
                if let Some(text) = message.payload.get("text").and_then(Value::as_str) {
                    self.log_lines.lock().push(text.to_string());
                }
            }
            _ => {}
        }
    }
}
