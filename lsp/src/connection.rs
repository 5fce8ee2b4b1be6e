//! One live language server session.
//!
//! A connection owns three background tasks instrumented with its span:
//!
//! * the **writer**, sole owner of the server's stdin, fed by a bounded
//!   channel so concurrent callers never interleave bytes mid-message;
//! * the **reader**, which decodes frames in wire order and routes each one to
//!   the correlator (responses) or the dispatcher (requests, notifications);
//! * the **exit monitor**, which notices a dead process even when its stdout
//!   is held open by someone else.
//!
//! Every way a connection can end funnels into [`Shared::terminate`], which
//! flips the state to `Terminated` and sweeps pending requests exactly once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use crate::adapter::LanguageAdapter;
use crate::codec::{FrameReader, FrameWriter, ReadError, TransportError};
use crate::correlator::Correlator;
use crate::dispatch::{Dispatcher, HandlerTable};
use crate::documents::DocumentStore;
use crate::error::{ClientError, HandshakeError, QueryError, RequestError, TerminationReason};
use crate::message::{Message, RemoteError};
use crate::process::{self, ExitReason, ServerProcess, StartupError};
use crate::protocol;
use crate::state::{ConnectionState, StateCell};
use crate::types::{CapabilityPolicy, ClientOptions};

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// How long the reader waits for an exit status after EOF, and the monitor
/// waits for EOF after an exit, before declaring the connection dead.
const EXIT_GRACE: Duration = Duration::from_millis(200);

enum WriterCommand {
    Send {
        message: Message,
        done: Option<oneshot::Sender<Result<(), TransportError>>>,
    },
    Shutdown,
}

// ============================================================================
// Shared state
// ============================================================================

struct Shared {
    name: String,
    state: StateCell,
    correlator: Correlator,
    dispatcher: Dispatcher,
    options: ClientOptions,
}

impl Shared {
    fn new(name: &str, initial: ConnectionState, handlers: HandlerTable, options: ClientOptions) -> Self {
        Self {
            name: name.to_string(),
            state: StateCell::new(initial),
            correlator: Correlator::new(),
            dispatcher: Dispatcher::new(handlers),
            options,
        }
    }

    /// Move to `Terminated(reason)` and fail all pending requests.
    ///
    /// Only the first call has any effect.
    fn terminate(&self, reason: TerminationReason) -> bool {
        if !self
            .state
            .advance(ConnectionState::Terminated(reason.clone()))
        {
            return false;
        }
        let swept = self.correlator.close(&reason);
        if reason.is_failure() {
            tracing::warn!(server = %self.name, swept, "connection terminated: {reason}");
        } else {
            tracing::info!(server = %self.name, swept, "connection closed");
        }
        true
    }

    fn termination_reason(&self) -> TerminationReason {
        self.state
            .get()
            .termination_reason()
            .cloned()
            .unwrap_or(TerminationReason::StreamClosed)
    }
}

// ============================================================================
// RPC handle
// ============================================================================

/// Request/notification sender shared by the handshake, the facade and
/// shutdown.
#[derive(Clone)]
pub(crate) struct RpcHandle {
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl RpcHandle {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.writer_tx
            .send(WriterCommand::Send {
                message,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| TransportError::WriterClosed)?;
        done_rx.await.map_err(|_| TransportError::WriterClosed)?
    }

    fn write_failure(&self, error: TransportError) -> RequestError {
        match error {
            TransportError::WriterClosed if self.shared.state.get().is_terminated() => {
                RequestError::ServerDied(self.shared.termination_reason())
            }
            other => RequestError::Transport(other),
        }
    }

    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let (id, rx) = self.shared.correlator.register(method)?;
        tracing::debug!(%id, method, "sending request");

        if let Err(e) = self.write(Message::request(id.clone(), method, params)).await {
            self.shared.correlator.forget(&id);
            return Err(self.write_failure(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(RequestError::ServerDied(self.shared.termination_reason())),
            Err(_) => {
                tracing::warn!(%id, method, ?timeout, "request timed out");
                if self.shared.options.cancel_on_timeout
                    && let Err(e) = self
                        .send_notification("$/cancelRequest", Some(protocol::cancel_params(&id)))
                        .await
                {
                    tracing::debug!(%id, "could not send $/cancelRequest: {e}");
                }
                Err(RequestError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), RequestError> {
        if let Some(reason) = self.shared.state.get().termination_reason() {
            return Err(RequestError::ServerDied(reason.clone()));
        }
        tracing::trace!(method, "sending notification");
        self.write(Message::notification(method, params))
            .await
            .map_err(|e| self.write_failure(e))
    }

    fn stop_writer(&self) {
        // A full channel means the writer is wedged; dropping the handle ends it anyway.
        let _ = self.writer_tx.try_send(WriterCommand::Shutdown);
    }
}

// ============================================================================
// Background tasks
// ============================================================================

async fn run_writer<W>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::Receiver<WriterCommand>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Send { message, done } => {
                let result = writer.write_message(&message).await;
                let failed = result.as_ref().err().map(ToString::to_string);
                if let Some(error) = &failed {
                    shared.terminate(TerminationReason::WriteFailed(error.clone()));
                }
                if let Some(done) = done {
                    let _ = done.send(result);
                }
                if failed.is_some() {
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
    if let Err(e) = writer.close().await {
        tracing::debug!("closing server stdin failed: {e}");
    }
}

async fn run_reader<R>(
    mut reader: FrameReader<R>,
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<WriterCommand>,
    exit: Option<watch::Receiver<Option<ExitReason>>>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_message().await {
            Ok(Some(Message::Response(response))) => {
                shared.correlator.resolve(response);
            }
            Ok(Some(Message::Notification(notification))) => {
                shared.dispatcher.dispatch_notification(notification);
            }
            Ok(Some(Message::Request(request))) => {
                tracing::debug!(id = %request.id, method = %request.method, "server request");
                let response = shared.dispatcher.dispatch_request(request);
                let command = WriterCommand::Send {
                    message: Message::Response(response),
                    done: None,
                };
                if writer_tx.send(command).await.is_err() {
                    tracing::debug!("writer gone, dropping reply to server request");
                }
            }
            Ok(None) => {
                let reason = match exit {
                    Some(exit) => {
                        match tokio::time::timeout(EXIT_GRACE, process::wait_for_exit(exit)).await {
                            Ok(status) => TerminationReason::ProcessExited(status),
                            Err(_) => TerminationReason::StreamClosed,
                        }
                    }
                    None => TerminationReason::StreamClosed,
                };
                shared.terminate(reason);
                break;
            }
            Err(ReadError::Malformed(e)) => {
                tracing::warn!("skipping malformed message from server: {e}");
            }
            Err(ReadError::Io(e)) => {
                shared.terminate(TerminationReason::ReadFailed(e.to_string()));
                break;
            }
        }
    }
}

async fn monitor_exit(exit: watch::Receiver<Option<ExitReason>>, shared: Arc<Shared>) {
    let status = process::wait_for_exit(exit).await;
    // Give the reader a chance to drain what the server wrote before dying.
    tokio::time::sleep(EXIT_GRACE).await;
    shared.terminate(TerminationReason::ProcessExited(status));
}

/// Validate an `initialize` result and extract its capabilities.
pub(crate) fn validate_initialize_result(
    result: Value,
    policy: CapabilityPolicy,
) -> Result<Value, HandshakeError> {
    let Value::Object(mut result) = result else {
        return Err(HandshakeError::InvalidResult(result.to_string()));
    };
    let capabilities = match result.remove("capabilities") {
        Some(capabilities @ Value::Object(_)) => capabilities,
        _ => return Err(HandshakeError::MissingCapabilities),
    };
    if capabilities
        .get("textDocumentSync")
        .is_none_or(Value::is_null)
    {
        match policy {
            CapabilityPolicy::Strict => return Err(HandshakeError::MissingTextDocumentSync),
            CapabilityPolicy::Lenient => {
                tracing::warn!("server capabilities omit textDocumentSync, continuing");
            }
        }
    }
    Ok(capabilities)
}

// ============================================================================
// Connection
// ============================================================================

/// A client connection to one language server.
pub struct Connection {
    adapter: Arc<dyn LanguageAdapter>,
    root: PathBuf,
    shared: Arc<Shared>,
    rpc: RpcHandle,
    span: Span,
    capabilities: OnceLock<Value>,
    documents: Mutex<DocumentStore>,
    process: Mutex<Option<ServerProcess>>,
    initialize_sent: AtomicBool,
    shutdown_started: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Launch the adapter's server for `root` and complete the handshake.
    ///
    /// On success the connection is `Ready`. On failure the process (if it
    /// was started) is stopped before the error is returned.
    pub async fn start(
        adapter: Arc<dyn LanguageAdapter>,
        root: impl AsRef<Path>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let requested = root.as_ref();
        let span = tracing::info_span!("lsp", server = %adapter.name());
        let shared = Arc::new(Shared::new(
            adapter.name(),
            ConnectionState::Created,
            handler_table(adapter.as_ref()),
            options,
        ));
        shared.state.advance(ConnectionState::Starting);

        let prepared = async {
            let root = tokio::fs::canonicalize(requested)
                .await
                .map_err(|e| StartupError::InvalidRoot {
                    path: requested.to_path_buf(),
                    reason: e.to_string(),
                })?;
            if !root.is_dir() {
                return Err(StartupError::InvalidRoot {
                    path: root,
                    reason: "not a directory".into(),
                });
            }

            let launch = {
                let adapter = Arc::clone(&adapter);
                let root = root.clone();
                tokio::task::spawn_blocking(move || adapter.launch_spec(&root))
                    .await
                    .map_err(|e| StartupError::Adapter(e.to_string()))??
            };
            let (process, pipes) = ServerProcess::spawn(&launch, &span)?;
            Ok::<_, StartupError>((root, process, pipes))
        }
        .instrument(span.clone())
        .await;

        let (root, process, pipes) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let _entered = span.enter();
                shared.terminate(TerminationReason::Startup(e.to_string()));
                return Err(e.into());
            }
        };

        shared.state.advance(ConnectionState::Initializing);
        let connection = Self::attach(
            adapter,
            root,
            shared,
            span,
            pipes.stdout,
            pipes.stdin,
            Some(process),
        );
        connection.initialize().await?;
        Ok(connection)
    }

    /// Build a connection over arbitrary streams, e.g. an in-memory duplex.
    ///
    /// The connection starts in `Initializing`; call [`Connection::initialize`]
    /// to perform the handshake. Must be called inside a tokio runtime.
    pub fn connect<R, W>(
        adapter: Arc<dyn LanguageAdapter>,
        root: impl Into<PathBuf>,
        reader: R,
        writer: W,
        options: ClientOptions,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let span = tracing::info_span!("lsp", server = %adapter.name());
        let shared = Arc::new(Shared::new(
            adapter.name(),
            ConnectionState::Initializing,
            handler_table(adapter.as_ref()),
            options,
        ));
        Self::attach(adapter, root.into(), shared, span, reader, writer, None)
    }

    fn attach<R, W>(
        adapter: Arc<dyn LanguageAdapter>,
        root: PathBuf,
        shared: Arc<Shared>,
        span: Span,
        reader: R,
        writer: W,
        process: Option<ServerProcess>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let exit = process.as_ref().map(ServerProcess::exit_watch);
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);

        let mut tasks = vec![
            tokio::spawn(
                run_writer(FrameWriter::new(writer), writer_rx, Arc::clone(&shared))
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                run_reader(
                    FrameReader::new(reader),
                    Arc::clone(&shared),
                    writer_tx.clone(),
                    exit.clone(),
                )
                .instrument(span.clone()),
            ),
        ];
        if let Some(exit) = exit {
            tasks.push(tokio::spawn(
                monitor_exit(exit, Arc::clone(&shared)).instrument(span.clone()),
            ));
        }

        let rpc = RpcHandle {
            shared: Arc::clone(&shared),
            writer_tx,
        };
        Self {
            adapter,
            root,
            shared,
            rpc,
            span,
            capabilities: OnceLock::new(),
            documents: Mutex::new(DocumentStore::new()),
            process: Mutex::new(process),
            initialize_sent: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
            tasks,
        }
    }

    /// Perform the `initialize` / `initialized` handshake.
    ///
    /// Exactly one `initialize` is ever sent per connection. Any handshake
    /// failure tears the connection down.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        let state = self.shared.state.get();
        if state != ConnectionState::Initializing {
            return Err(HandshakeError::NotInitializing(state).into());
        }
        if self.initialize_sent.swap(true, Ordering::SeqCst) {
            return Err(HandshakeError::AlreadyInitialized.into());
        }

        self.handshake()
            .instrument(self.span.clone())
            .await
    }

    async fn handshake(&self) -> Result<(), ClientError> {
        let params = match self.adapter.initialize_params(&self.root) {
            Ok(params) => params,
            Err(e) => {
                self.teardown(TerminationReason::Startup(e.to_string())).await;
                return Err(e.into());
            }
        };

        let options = &self.shared.options;
        let outcome = self
            .rpc
            .send_request("initialize", Some(params), options.initialize_timeout)
            .await
            .map_err(|e| match e {
                RequestError::Remote(remote) => HandshakeError::Rejected(remote),
                other => HandshakeError::Request(other),
            })
            .and_then(|result| validate_initialize_result(result, options.capability_policy));

        let capabilities = match outcome {
            Ok(capabilities) => capabilities,
            Err(e) => return Err(self.fail_handshake(e).await),
        };
        let _ = self.capabilities.set(capabilities);

        // FIFO writer: `initialized` is on the wire before anything sent after Ready.
        if let Err(e) = self
            .rpc
            .send_notification("initialized", Some(json!({})))
            .await
        {
            return Err(self.fail_handshake(HandshakeError::Request(e)).await);
        }

        if !self.shared.state.advance(ConnectionState::Ready) {
            let reason = self.shared.termination_reason();
            return Err(HandshakeError::Request(RequestError::ServerDied(reason)).into());
        }
        tracing::info!(root = %self.root.display(), "language server ready");
        Ok(())
    }

    async fn fail_handshake(&self, error: HandshakeError) -> ClientError {
        let reason = match &error {
            HandshakeError::Request(RequestError::ServerDied(reason)) => reason.clone(),
            other => TerminationReason::Handshake(other.to_string()),
        };
        self.teardown(reason).await;
        error.into()
    }

    /// Terminate with `reason`, stop the writer and the process.
    async fn teardown(&self, reason: TerminationReason) {
        self.shared.terminate(reason);
        self.rpc.stop_writer();
        if let Some(process) = self.process.lock().await.as_mut() {
            process.terminate(self.shared.options.shutdown_timeout).await;
        }
    }

    /// Orderly shutdown: `shutdown` request, `exit` notification, then stop
    /// the process. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            let mut state = self.shared.state.subscribe();
            let _ = state.wait_for(ConnectionState::is_terminated).await;
            return;
        }
        self.shutdown_inner().instrument(self.span.clone()).await;
    }

    async fn shutdown_inner(&self) {
        if !self.shared.state.get().is_terminated() {
            self.shared.state.advance(ConnectionState::ShuttingDown);
            let grace = self.shared.options.shutdown_timeout;
            if let Err(e) = self.rpc.send_request("shutdown", None, grace).await {
                tracing::debug!("shutdown request failed: {e}");
            }
            if let Err(e) = self.rpc.send_notification("exit", None).await {
                tracing::debug!("exit notification failed: {e}");
            }
        }
        self.teardown(TerminationReason::Shutdown).await;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The server's capabilities, once the handshake has validated them.
    #[must_use]
    pub fn capabilities(&self) -> Option<&Value> {
        self.capabilities.get()
    }

    /// Number of requests written but not yet answered.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    /// Register a notification handler on the live connection.
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .update(|table| table.on_notification(method, handler))
    }

    /// Register a reverse-request handler on the live connection.
    pub fn on_request<F>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Option<Value>) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .update(|table| table.on_request(method, handler))
    }

    /// Send an arbitrary request once the connection is ready.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, QueryError> {
        self.ensure_ready()?;
        Ok(self
            .rpc
            .send_request(method, params, self.shared.options.request_timeout)
            .await?)
    }

    // ------------------------------------------------------------------
    // Crate-internal access for the query facade
    // ------------------------------------------------------------------

    pub(crate) fn ensure_ready(&self) -> Result<(), QueryError> {
        let state = self.shared.state.get();
        if state.is_ready() {
            Ok(())
        } else {
            Err(QueryError::NotReady { state })
        }
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn LanguageAdapter> {
        &self.adapter
    }

    pub(crate) fn rpc(&self) -> &RpcHandle {
        &self.rpc
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.shared.options.request_timeout
    }

    pub(crate) fn documents(&self) -> &Mutex<DocumentStore> {
        &self.documents
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }
}

fn handler_table(adapter: &dyn LanguageAdapter) -> HandlerTable {
    let mut table = HandlerTable::with_defaults();
    table.extend(adapter.extra_handlers());
    table
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.shared.name)
            .field("root", &self.root)
            .field("state", &self.shared.state.get())
            .finish_non_exhaustive()
    }
}
