//! Client session: one backend connection and its protocol state
//!
//! A session owns a single I/O task that serializes every write and decodes
//! every read. Calls never wait for a response: a request returns its id as
//! soon as it is queued, and the answer later arrives on the session's event
//! channel as a [`SessionEvent`] tagged with that id.

use crate::io::process::{
    ChildProcessManager, ProcessDescriptor, ProcessExitEvent, ProcessExitHandler, ProcessManager,
    StderrMonitor, StopMode,
};
use crate::io::transport::Transport;
use crate::lsp::decode::{decode_publish_diagnostics, decode_result};
use crate::lsp::documents::{DocumentSync, DocumentTracker};
use crate::lsp::error::{LspError, RequestFailure};
use crate::lsp::framing::LspFraming;
use crate::lsp::params::{self, InitializeRequest};
use crate::lsp::pending::PendingRequests;
use crate::lsp::protocol::{
    self, Envelope, JsonRpcErrorCode, JsonRpcErrorObject, id_as_u64, methods,
};
use crate::lsp::types::{DecodedResult, InitializeOutcome};
use crate::router::key::ProjectKey;
use crate::{log_lsp_message, log_timing};
use async_trait::async_trait;
use lsp_types::{
    FormattingOptions, Position, PublishDiagnosticsParams, Range, TextDocumentContentChangeEvent,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{Level, debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// How response payloads are handed to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Decode each result with its method's decoder
    #[default]
    Typed,
    /// Deliver results as [`DecodedResult::Raw`]; `initialize` is always
    /// decoded so capabilities can be cached
    Raw,
}

/// Session construction options
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub label: String,
    pub decode_mode: DecodeMode,
    pub client_name: String,
    pub client_version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            label: "backend".to_string(),
            decode_mode: DecodeMode::Typed,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl SessionOptions {
    /// Name used in log lines for this session
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_decode_mode(mut self, decode_mode: DecodeMode) -> Self {
        self.decode_mode = decode_mode;
        self
    }

    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// `initialize` params for a project rooted at `root`
    pub fn initialize_request(
        &self,
        root: &Path,
        compile_commands_dir: Option<&Path>,
    ) -> InitializeRequest {
        InitializeRequest {
            root: root.to_path_buf(),
            compile_commands_dir: compile_commands_dir.map(Path::to_path_buf),
            client_name: self.client_name.clone(),
            client_version: self.client_version.clone(),
            process_id: std::process::id(),
        }
    }
}

// ============================================================================
// State and events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    /// Connected (process spawned or transport attached), no `initialize` yet
    Starting,
    AwaitingInitializeResult,
    Ready,
    ShuttingDown,
    Exited,
}

/// Everything a session reports to its owner, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Result {
        id: u64,
        method: String,
        context: Option<PathBuf>,
        result: DecodedResult,
    },
    Failed {
        id: u64,
        method: String,
        context: Option<PathBuf>,
        failure: RequestFailure,
    },
    Diagnostics(PublishDiagnosticsParams),
    /// Any other server notification (and `publishDiagnostics` in raw mode)
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Terminal: no further events follow
    Exited { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
enum InitializeStatus {
    Pending,
    Ready(Arc<InitializeOutcome>),
    Failed(RequestFailure),
}

enum Outbound {
    Message(String),
    Close,
}

/// State shared between the session handle and its I/O task
struct Shared {
    label: String,
    decode_mode: DecodeMode,
    pending: PendingRequests,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    initialize: watch::Sender<InitializeStatus>,
    initialize_started: Mutex<Option<Instant>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("[{}] event receiver dropped", self.label);
        }
    }

    /// Handle one inbound message; returns messages to write back
    fn handle_inbound(&self, text: &str) -> Vec<String> {
        match protocol::decode(text) {
            Envelope::Malformed { reason } => {
                warn!("[{}] dropping malformed message: {}", self.label, reason);
                log_lsp_message!(Level::DEBUG, "inbound", "<malformed>", text);
                Vec::new()
            }
            Envelope::Error { id, error } => {
                log_lsp_message!(Level::DEBUG, "inbound", "<error>", text);
                self.handle_error(id, error);
                Vec::new()
            }
            Envelope::Response { id, result } => {
                log_lsp_message!(Level::DEBUG, "inbound", "<response>", text);
                self.handle_response(id, result)
            }
            Envelope::Notification { method, params } => {
                log_lsp_message!(Level::DEBUG, "inbound", method.as_str(), text);
                self.handle_notification(method, params);
                Vec::new()
            }
            Envelope::Request { id, method, .. } => {
                log_lsp_message!(Level::DEBUG, "inbound", method.as_str(), text);
                vec![self.answer_server_request(&id, &method)]
            }
        }
    }

    fn handle_error(&self, id: Option<Value>, error: JsonRpcErrorObject) {
        let entry = id
            .as_ref()
            .and_then(id_as_u64)
            .and_then(|id| self.pending.take(id));

        let Some(entry) = entry else {
            debug!(
                "[{}] error for unknown request {:?}: {}",
                self.label, id, error.message
            );
            return;
        };

        warn!(
            "[{}] {} (id {}) failed: {} ({})",
            self.label, entry.method, entry.id, error.message, error.code
        );

        let failure = RequestFailure::Protocol {
            code: error.code,
            message: error.message,
        };
        if entry.method == methods::INITIALIZE {
            self.initialize.send_replace(InitializeStatus::Failed(failure.clone()));
        }
        self.emit(SessionEvent::Failed {
            id: entry.id,
            method: entry.method,
            context: entry.context,
            failure,
        });
    }

    fn handle_response(&self, id: Value, result: Value) -> Vec<String> {
        let Some(numeric_id) = id_as_u64(&id) else {
            debug!("[{}] response with foreign id {}", self.label, id);
            return Vec::new();
        };
        let Some(method) = self.pending.method_of(numeric_id) else {
            debug!("[{}] no pending request for id {}", self.label, numeric_id);
            return Vec::new();
        };

        // Decode before claiming the entry so the table lock is never held
        // across decoding
        let decoded = if method == methods::INITIALIZE || self.decode_mode == DecodeMode::Typed {
            decode_result(&method, result)
        } else {
            Ok(DecodedResult::Raw(result))
        };

        let Some(context) = self.pending.take_by_method(numeric_id, &method) else {
            debug!("[{}] id {} resolved elsewhere, dropping", self.label, numeric_id);
            return Vec::new();
        };

        let mut replies = Vec::new();
        match decoded {
            Ok(result) => {
                if let DecodedResult::Initialize(outcome) = &result {
                    self.on_initialized(outcome);
                    replies.push(protocol::encode_notification(
                        methods::INITIALIZED,
                        Some(&serde_json::json!({})),
                    ));
                }
                self.emit(SessionEvent::Result {
                    id: numeric_id,
                    method,
                    context,
                    result,
                });
            }
            Err(e) => {
                warn!("[{}] {} result undecodable: {}", self.label, method, e);
                let failure = RequestFailure::UndecodableResult { reason: e.0 };
                if method == methods::INITIALIZE {
                    self.initialize.send_replace(InitializeStatus::Failed(failure.clone()));
                }
                self.emit(SessionEvent::Failed {
                    id: numeric_id,
                    method,
                    context,
                    failure,
                });
            }
        }
        replies
    }

    fn on_initialized(&self, outcome: &InitializeOutcome) {
        {
            let mut state = self.state();
            if *state == SessionState::AwaitingInitializeResult {
                *state = SessionState::Ready;
            }
        }

        let started = self
            .initialize_started
            .lock()
            .ok()
            .and_then(|mut started| started.take());
        if let Some(started) = started {
            log_timing!(Level::INFO, "initialize", started.elapsed());
        }

        info!(
            "[{}] backend ready: {}",
            self.label,
            outcome
                .server_info
                .as_ref()
                .map(|info| info.name.as_str())
                .unwrap_or("unknown server")
        );
        self.initialize
            .send_replace(InitializeStatus::Ready(Arc::new(outcome.clone())));
    }

    fn handle_notification(&self, method: String, params: Option<Value>) {
        if method == methods::PUBLISH_DIAGNOSTICS && self.decode_mode == DecodeMode::Typed {
            match decode_publish_diagnostics(params.unwrap_or(Value::Null)) {
                Ok(diagnostics) => self.emit(SessionEvent::Diagnostics(diagnostics)),
                Err(e) => warn!("[{}] dropping diagnostics: {}", self.label, e),
            }
            return;
        }
        self.emit(SessionEvent::Notification { method, params });
    }

    /// Progress token creation is accepted; anything else is unsupported
    fn answer_server_request(&self, id: &Value, method: &str) -> String {
        if method == methods::WORK_DONE_PROGRESS_CREATE {
            return protocol::encode_response(id, &Value::Null);
        }
        debug!("[{}] declining server request {}", self.label, method);
        protocol::encode_error_response(
            id,
            &JsonRpcErrorObject::new(
                JsonRpcErrorCode::MethodNotFound,
                format!("Method not supported by client: {method}"),
            ),
        )
    }

    /// Move to `Exited` once, cancelling everything still pending
    fn terminate(&self, reason: &str) {
        {
            let mut state = self.state();
            if *state == SessionState::Exited {
                return;
            }
            *state = SessionState::Exited;
        }

        let orphans = self.pending.drop_all();
        if !orphans.is_empty() {
            info!(
                "[{}] cancelling {} pending request(s): {}",
                self.label,
                orphans.len(),
                reason
            );
        }
        for orphan in orphans {
            self.emit(SessionEvent::Failed {
                id: orphan.id,
                method: orphan.method,
                context: orphan.context,
                failure: RequestFailure::Cancelled {
                    reason: reason.to_string(),
                },
            });
        }

        self.initialize.send_if_modified(|status| {
            if *status == InitializeStatus::Pending {
                *status = InitializeStatus::Failed(RequestFailure::Cancelled {
                    reason: reason.to_string(),
                });
                true
            } else {
                false
            }
        });

        info!("[{}] session exited: {}", self.label, reason);
        self.emit(SessionEvent::Exited {
            reason: reason.to_string(),
        });
    }
}

// ============================================================================
// I/O task
// ============================================================================

enum Io<E> {
    Outbound(Option<Outbound>),
    Inbound(Result<String, E>),
    ProcessExit(Option<ProcessExitEvent>),
}

/// Forwards process exit to the I/O task
struct ExitForwarder(mpsc::UnboundedSender<ProcessExitEvent>);

#[async_trait]
impl ProcessExitHandler for ExitForwarder {
    async fn on_process_exit(&self, event: ProcessExitEvent) {
        let _ = self.0.send(event);
    }
}

async fn next_exit(
    receiver: &mut Option<mpsc::UnboundedReceiver<ProcessExitEvent>>,
) -> Option<ProcessExitEvent> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_io<T: Transport + 'static>(
    shared: Arc<Shared>,
    transport: T,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut process: Option<ChildProcessManager>,
    mut exits: Option<mpsc::UnboundedReceiver<ProcessExitEvent>>,
) {
    let mut framing = LspFraming::new(transport);

    let reason = loop {
        let io = tokio::select! {
            message = outbound.recv() => Io::Outbound(message),
            received = framing.receive() => Io::Inbound(received),
            exit = next_exit(&mut exits) => Io::ProcessExit(exit),
        };

        match io {
            Io::Outbound(Some(Outbound::Message(text))) => {
                if let Err(e) = framing.send(&text).await {
                    break format!("write to backend failed: {e}");
                }
            }
            Io::Outbound(Some(Outbound::Close)) => break "session closed".to_string(),
            Io::Outbound(None) => break "session handle dropped".to_string(),
            Io::Inbound(Ok(text)) => {
                for reply in shared.handle_inbound(&text) {
                    log_lsp_message!(Level::DEBUG, "outbound", "<reply>", reply);
                    if let Err(e) = framing.send(&reply).await {
                        warn!("[{}] failed to answer backend: {}", shared.label, e);
                    }
                }
            }
            Io::Inbound(Err(e)) => break format!("backend stream ended: {e}"),
            Io::ProcessExit(Some(event)) => {
                break match event.code {
                    Some(code) => format!("backend process exited with code {code}"),
                    None => "backend process terminated".to_string(),
                };
            }
            Io::ProcessExit(None) => exits = None,
        }
    };

    // Later sends fail fast; anything already queued is cancelled below
    outbound.close();
    shared.terminate(&reason);

    let _ = framing.close().await;
    if let Some(manager) = process.as_mut() {
        if manager.is_running() {
            if let Err(e) = manager.stop(StopMode::Graceful).await {
                debug!("[{}] stopping backend: {}", shared.label, e);
            }
        }
    }
}

// ============================================================================
// Client session
// ============================================================================

/// One connection to a language server backend
pub struct ClientSession {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    next_id: AtomicU64,
    initialize_sent: AtomicBool,
    documents: Mutex<DocumentTracker>,
    selected_key: Mutex<Option<ProjectKey>>,
    initialize_status: watch::Receiver<InitializeStatus>,
    options: SessionOptions,
}

impl ClientSession {
    /// Launch a backend process and attach a session to its stdio
    ///
    /// Backend stderr is logged under the session label and never parsed.
    pub async fn spawn(
        descriptor: ProcessDescriptor,
        options: SessionOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), LspError> {
        let mut manager = ChildProcessManager::new(descriptor);

        let label = options.label.clone();
        manager.on_stderr_line(move |line| {
            debug!(target: "lsp_gateway::backend_stderr", backend = %label, "{}", line);
        });

        let (exit_sender, exit_receiver) = mpsc::unbounded_channel();
        manager.set_exit_handler(Arc::new(ExitForwarder(exit_sender)));

        manager.start().await?;
        let transport = manager.take_transport()?;

        Ok(Self::start(
            transport,
            options,
            Some(manager),
            Some(exit_receiver),
        ))
    }

    /// Attach a session to an already connected transport
    pub fn attach<T: Transport + 'static>(
        transport: T,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::start(transport, options, None, None)
    }

    fn start<T: Transport + 'static>(
        transport: T,
        options: SessionOptions,
        process: Option<ChildProcessManager>,
        exits: Option<mpsc::UnboundedReceiver<ProcessExitEvent>>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        let (initialize_sender, initialize_receiver) = watch::channel(InitializeStatus::Pending);

        let shared = Arc::new(Shared {
            label: options.label.clone(),
            decode_mode: options.decode_mode,
            pending: PendingRequests::new(),
            state: Mutex::new(SessionState::Starting),
            events: event_sender,
            initialize: initialize_sender,
            initialize_started: Mutex::new(None),
        });

        tokio::spawn(run_io(
            Arc::clone(&shared),
            transport,
            outbound_receiver,
            process,
            exits,
        ));

        let session = Self {
            shared,
            outbound: outbound_sender,
            next_id: AtomicU64::new(1),
            initialize_sent: AtomicBool::new(false),
            documents: Mutex::new(DocumentTracker::new()),
            selected_key: Mutex::new(None),
            initialize_status: initialize_receiver,
            options,
        };
        (session, event_receiver)
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state()
    }

    pub fn is_exited(&self) -> bool {
        self.state() == SessionState::Exited
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Cached `initialize` outcome, once the backend has answered
    pub fn capabilities(&self) -> Option<Arc<InitializeOutcome>> {
        match &*self.initialize_status.borrow() {
            InitializeStatus::Ready(outcome) => Some(Arc::clone(outcome)),
            _ => None,
        }
    }

    /// Wait for the handshake to finish
    pub async fn wait_initialized(&self) -> Result<Arc<InitializeOutcome>, RequestFailure> {
        let mut status = self.initialize_status.clone();
        let settled = status
            .wait_for(|status| *status != InitializeStatus::Pending)
            .await
            .map(|status| status.clone());

        match settled {
            Ok(InitializeStatus::Ready(outcome)) => Ok(outcome),
            Ok(InitializeStatus::Failed(failure)) => Err(failure),
            Ok(InitializeStatus::Pending) | Err(_) => Err(RequestFailure::Cancelled {
                reason: "session ended before initialize completed".to_string(),
            }),
        }
    }

    fn documents(&self) -> MutexGuard<'_, DocumentTracker> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue(&self, text: String) -> Result<(), LspError> {
        self.outbound
            .send(Outbound::Message(text))
            .map_err(|_| LspError::SessionExited)
    }

    // ------------------------------------------------------------------------
    // Generic calls
    // ------------------------------------------------------------------------

    /// Send a request, returning its id once queued for writing
    ///
    /// The entry is registered under the state lock, so it is either
    /// refused here or cancelled by the I/O task when the session ends.
    pub fn request(
        &self,
        method: &str,
        params: Option<Value>,
        context: Option<PathBuf>,
    ) -> Result<u64, LspError> {
        let state = self.shared.state();
        if *state == SessionState::Exited {
            return Err(LspError::SessionExited);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.pending.put(id, method, context)?;

        let text = protocol::encode_request(id, method, params.as_ref());
        log_lsp_message!(Level::DEBUG, "outbound", method, text);

        if let Err(e) = self.queue(text) {
            self.shared.pending.take(id);
            return Err(e);
        }
        Ok(id)
    }

    fn typed_request<P: Serialize>(
        &self,
        method: &str,
        params: &P,
        context: Option<PathBuf>,
    ) -> Result<u64, LspError> {
        self.request(method, Some(serde_json::to_value(params)?), context)
    }

    fn typed_notify<P: Serialize>(&self, method: &str, params: &P) -> Result<(), LspError> {
        self.notify(method, Some(serde_json::to_value(params)?))
    }

    /// Send a notification: no id, nothing pending
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        if self.is_exited() {
            return Err(LspError::SessionExited);
        }

        let text = protocol::encode_notification(method, params.as_ref());
        log_lsp_message!(Level::DEBUG, "outbound", method, text);
        self.queue(text)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Send `initialize`. Allowed exactly once per session.
    pub fn initialize(&self, request: &InitializeRequest) -> Result<u64, LspError> {
        let params = serde_json::to_value(request.to_params()?)?;
        if self.initialize_sent.swap(true, Ordering::SeqCst) {
            return Err(LspError::AlreadyInitialized);
        }

        if let Ok(mut started) = self.shared.initialize_started.lock() {
            *started = Some(Instant::now());
        }
        {
            let mut state = self.shared.state();
            if *state == SessionState::Starting || *state == SessionState::NotStarted {
                *state = SessionState::AwaitingInitializeResult;
            }
        }

        info!("[{}] initializing {}", self.label(), request.root.display());
        self.request(methods::INITIALIZE, Some(params), None)
    }

    pub fn shutdown(&self) -> Result<u64, LspError> {
        let id = self.request(methods::SHUTDOWN, None, None)?;
        let mut state = self.shared.state();
        if *state != SessionState::Exited {
            *state = SessionState::ShuttingDown;
        }
        Ok(id)
    }

    /// Send `exit` and close the connection once it is written
    pub fn exit(&self) -> Result<(), LspError> {
        self.notify(methods::EXIT, None)?;
        self.close();
        Ok(())
    }

    /// Close the connection after everything already queued is written
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Tell a gateway which backend to use. Returns false when `key` is
    /// already selected and nothing was sent.
    pub fn select_lsp_server(&self, key: &ProjectKey) -> Result<bool, LspError> {
        let mut selected = self
            .selected_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if selected.as_ref() == Some(key) {
            return Ok(false);
        }
        self.notify(methods::SELECT_LSP_SERVER, Some(key.to_select_params()))?;
        *selected = Some(key.clone());
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Document synchronization
    // ------------------------------------------------------------------------

    pub fn did_open(&self, path: &Path, text: &str) -> Result<(), LspError> {
        self.did_open_as(path, params::language_id_for(path), text)
    }

    pub fn did_open_as(&self, path: &Path, language_id: &str, text: &str) -> Result<(), LspError> {
        let mut documents = self.documents();
        let version = documents.open(path, text);
        let params = params::did_open(path, language_id, version, text);
        match params.and_then(|params| self.typed_notify(methods::DID_OPEN, &params)) {
            Ok(()) => Ok(()),
            Err(e) => {
                documents.close(path);
                Err(e)
            }
        }
    }

    /// Replace the whole document text
    pub fn did_change(&self, path: &Path, text: &str) -> Result<i32, LspError> {
        self.send_change(path, Some(text), &[params::full_change(text)])
    }

    /// Apply ranged edits
    pub fn did_change_ranges(
        &self,
        path: &Path,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<i32, LspError> {
        self.send_change(path, None, changes)
    }

    fn send_change(
        &self,
        path: &Path,
        full_text: Option<&str>,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<i32, LspError> {
        let uri = params::path_to_uri(path)?;
        let mut documents = self.documents();
        let version = documents
            .next_change(path, full_text)
            .ok_or_else(|| LspError::DocumentNotOpen(path.to_path_buf()))?;
        debug!("[{}] {} -> version {}", self.label(), uri.as_str(), version);

        self.typed_notify(methods::DID_CHANGE, &params::did_change(path, version, changes)?)?;
        Ok(version)
    }

    pub fn did_close(&self, path: &Path) -> Result<(), LspError> {
        let params = params::did_close(path)?;
        if !self.documents().close(path) {
            debug!("[{}] closing untracked {}", self.label(), path.display());
        }
        self.typed_notify(methods::DID_CLOSE, &params)
    }

    /// Open `path` on first use, re-send it only when `text` changed
    pub fn ensure_document(&self, path: &Path, text: &str) -> Result<DocumentSync, LspError> {
        params::path_to_uri(path)?;
        let mut documents = self.documents();
        let sync = documents.sync(path, text);

        let sent = match &sync {
            DocumentSync::Open {
                version,
                language_id,
            } => params::did_open(path, language_id, *version, text)
                .and_then(|params| self.typed_notify(methods::DID_OPEN, &params)),
            DocumentSync::Change { version } => {
                params::did_change(path, *version, &[params::full_change(text)])
                    .and_then(|params| self.typed_notify(methods::DID_CHANGE, &params))
            }
            DocumentSync::Unchanged => Ok(()),
        };

        if let Err(e) = sent {
            documents.close(path);
            return Err(e);
        }
        Ok(sync)
    }

    pub fn document_version(&self, path: &Path) -> Option<i32> {
        self.documents().version(path)
    }

    // ------------------------------------------------------------------------
    // Language features
    // ------------------------------------------------------------------------

    fn position_request(&self, method: &str, path: &Path, position: Position) -> Result<u64, LspError> {
        let params = params::text_document_position(path, position)?;
        self.typed_request(method, &params, Some(path.to_path_buf()))
    }

    pub fn definition(&self, path: &Path, position: Position) -> Result<u64, LspError> {
        self.position_request(methods::DEFINITION, path, position)
    }

    pub fn references(
        &self,
        path: &Path,
        position: Position,
        include_declaration: bool,
    ) -> Result<u64, LspError> {
        let params = params::references(path, position, include_declaration)?;
        self.typed_request(methods::REFERENCES, &params, Some(path.to_path_buf()))
    }

    pub fn completion(&self, path: &Path, position: Position) -> Result<u64, LspError> {
        let params = params::completion(path, position)?;
        self.typed_request(methods::COMPLETION, &params, Some(path.to_path_buf()))
    }

    pub fn signature_help(&self, path: &Path, position: Position) -> Result<u64, LspError> {
        self.position_request(methods::SIGNATURE_HELP, path, position)
    }

    pub fn hover(&self, path: &Path, position: Position) -> Result<u64, LspError> {
        self.position_request(methods::HOVER, path, position)
    }

    pub fn document_highlight(&self, path: &Path, position: Position) -> Result<u64, LspError> {
        self.position_request(methods::DOCUMENT_HIGHLIGHT, path, position)
    }

    pub fn document_symbol(&self, path: &Path) -> Result<u64, LspError> {
        let params = params::document_symbol(path)?;
        self.typed_request(methods::DOCUMENT_SYMBOL, &params, Some(path.to_path_buf()))
    }

    pub fn semantic_tokens_full(&self, path: &Path) -> Result<u64, LspError> {
        let params = params::semantic_tokens(path)?;
        self.typed_request(methods::SEMANTIC_TOKENS_FULL, &params, Some(path.to_path_buf()))
    }

    pub fn rename(&self, path: &Path, position: Position, new_name: &str) -> Result<u64, LspError> {
        let params = params::rename(path, position, new_name)?;
        self.typed_request(methods::RENAME, &params, Some(path.to_path_buf()))
    }

    pub fn formatting(&self, path: &Path, options: FormattingOptions) -> Result<u64, LspError> {
        let params = params::formatting(path, options)?;
        self.typed_request(methods::FORMATTING, &params, Some(path.to_path_buf()))
    }

    pub fn range_formatting(
        &self,
        path: &Path,
        range: Range,
        options: FormattingOptions,
    ) -> Result<u64, LspError> {
        let params = params::range_formatting(path, range, options)?;
        self.typed_request(methods::RANGE_FORMATTING, &params, Some(path.to_path_buf()))
    }

    /// clangd: find the header for a source file or vice versa
    pub fn switch_header_source(&self, path: &Path) -> Result<u64, LspError> {
        let params = params::text_document(path)?;
        self.typed_request(methods::SWITCH_SOURCE_HEADER, &params, Some(path.to_path_buf()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::types::{advertised, range};
    use lsp_types::GotoDefinitionResponse;
    use crate::test_utils::stub::{self, StubBackend};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    async fn ready_session(
        options: SessionOptions,
    ) -> (ClientSession, mpsc::UnboundedReceiver<SessionEvent>, StubBackend) {
        let (transport, mut backend) = stub::pair();
        let (session, mut events) = ClientSession::attach(transport, options);

        let request = session
            .options()
            .initialize_request(Path::new("/p"), Some(Path::new("/p/build")));
        session.initialize(&request).unwrap();
        backend.complete_handshake(json!({"definitionProvider": true})).await;

        match next_event(&mut events).await {
            SessionEvent::Result {
                result: DecodedResult::Initialize(_),
                ..
            } => {}
            other => panic!("expected initialize result, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Ready);
        (session, events, backend)
    }

    #[tokio::test]
    async fn test_definition_scenario_yields_single_location() {
        let (transport, mut backend) = stub::pair();
        let (session, mut events) = ClientSession::attach(transport, SessionOptions::default());

        let id = session
            .definition(Path::new("/p/a.cpp"), Position::new(10, 4))
            .unwrap();
        assert_eq!(id, 1);

        let request = backend.recv().await;
        assert_eq!(request["method"], "textDocument/definition");
        assert_eq!(request["params"]["textDocument"]["uri"], "file:///p/a.cpp");
        assert_eq!(request["params"]["position"], json!({"line": 10, "character": 4}));

        backend
            .send_raw(r#"{"id":1,"result":{"uri":"file:///p/a.cpp","range":{"start":{"line":9,"character":0},"end":{"line":9,"character":3}}}}"#)
            .await;

        match next_event(&mut events).await {
            SessionEvent::Result {
                id,
                method,
                context,
                result: DecodedResult::Definition(Some(GotoDefinitionResponse::Scalar(location))),
            } => {
                assert_eq!(id, 1);
                assert_eq!(method, "textDocument/definition");
                assert_eq!(context, Some(PathBuf::from("/p/a.cpp")));
                assert_eq!(location.uri.as_str(), "file:///p/a.cpp");
                assert_eq!(location.range, range((9, 0), (9, 3)));
            }
            other => panic!("expected a single location, got {other:?}"),
        }
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_permuted_responses_resolve_exactly_once() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        let mut expected = HashMap::new();
        for n in 0..6u32 {
            let path = PathBuf::from(format!("/p/file{n}.cpp"));
            let id = if n % 2 == 0 {
                session.hover(&path, Position::new(n, 0)).unwrap()
            } else {
                session.references(&path, Position::new(n, 0), false).unwrap()
            };
            expected.insert(id, path);
        }

        let mut requests = Vec::new();
        for _ in 0..6 {
            requests.push(backend.recv().await);
        }
        requests.reverse();
        requests.swap(1, 4);

        for request in &requests {
            let result = if request["method"] == "textDocument/hover" {
                json!({"contents": "docs"})
            } else {
                json!([])
            };
            backend.respond(&request["id"], result.clone()).await;
            // Duplicate answers must be ignored
            backend.respond(&request["id"], result).await;
        }

        let mut resolved = HashMap::new();
        for _ in 0..6 {
            match next_event(&mut events).await {
                SessionEvent::Result {
                    id,
                    method,
                    context,
                    result,
                } => {
                    match result {
                        DecodedResult::Hover(_) => assert_eq!(method, "textDocument/hover"),
                        DecodedResult::References(_) => {
                            assert_eq!(method, "textDocument/references")
                        }
                        other => panic!("unexpected result {other:?}"),
                    }
                    assert!(resolved.insert(id, context).is_none(), "id {id} resolved twice");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        for (id, path) in expected {
            assert_eq!(resolved.get(&id), Some(&Some(path)));
        }
        assert_eq!(session.pending_count(), 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), events.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_diagnostics_leave_pending_requests_alone() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        let first = session.hover(Path::new("/p/a.cpp"), Position::new(0, 0)).unwrap();
        let second = session.completion(Path::new("/p/a.cpp"), Position::new(1, 0)).unwrap();
        backend.recv().await;
        backend.recv().await;

        backend
            .send_raw(&protocol::encode_notification(
                methods::PUBLISH_DIAGNOSTICS,
                Some(&json!({
                    "uri": "file:///p/a.cpp",
                    "version": 2,
                    "diagnostics": [{
                        "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
                        "message": "expected ';'"
                    }]
                })),
            ))
            .await;

        match next_event(&mut events).await {
            SessionEvent::Diagnostics(batch) => {
                assert_eq!(batch.version, Some(2));
                assert_eq!(batch.diagnostics[0].message, "expected ';'");
            }
            other => panic!("expected diagnostics, got {other:?}"),
        }
        assert_eq!(session.pending_count(), 2);

        backend.respond(&json!(second), json!([])).await;
        backend.respond(&json!(first), Value::Null).await;

        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Result { id, result: DecodedResult::Completion(_), .. } if id == second
        ));
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Result { id, result: DecodedResult::Hover(None), .. } if id == first
        ));
    }

    #[tokio::test]
    async fn test_orphaned_requests_cancelled_on_exit() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        let ids = [
            session.hover(Path::new("/p/a.cpp"), Position::new(0, 0)).unwrap(),
            session.document_symbol(Path::new("/p/a.cpp")).unwrap(),
            session.semantic_tokens_full(Path::new("/p/a.cpp")).unwrap(),
        ];
        for _ in 0..3 {
            backend.recv().await;
        }

        backend.hang_up().await;

        let mut cancelled = Vec::new();
        for _ in 0..3 {
            match next_event(&mut events).await {
                SessionEvent::Failed {
                    id,
                    failure: RequestFailure::Cancelled { .. },
                    ..
                } => cancelled.push(id),
                other => panic!("expected cancellation, got {other:?}"),
            }
        }
        assert_eq!(cancelled, ids.to_vec());
        assert!(matches!(next_event(&mut events).await, SessionEvent::Exited { .. }));
        assert_eq!(session.state(), SessionState::Exited);
        assert_eq!(session.pending_count(), 0);

        assert!(matches!(
            session.hover(Path::new("/p/a.cpp"), Position::new(0, 0)),
            Err(LspError::SessionExited)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requests_racing_hang_up_each_resolve_once() {
        let (session, mut events, backend) = ready_session(SessionOptions::default()).await;
        let session = Arc::new(session);

        let barrier = Arc::new(std::sync::Barrier::new(5));
        let issuers: Vec<_> = (0..4)
            .map(|n| {
                let session = Arc::clone(&session);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut accepted = Vec::new();
                    let path = PathBuf::from(format!("/p/thread{n}.cpp"));
                    for line in 0..10_000u32 {
                        match session.hover(&path, Position::new(line, 0)) {
                            Ok(id) => accepted.push(id),
                            Err(LspError::SessionExited) => break,
                            Err(e) => panic!("unexpected error {e}"),
                        }
                    }
                    accepted
                })
            })
            .collect();

        barrier.wait();
        backend.hang_up().await;

        let mut accepted: Vec<u64> = issuers
            .into_iter()
            .flat_map(|issuer| issuer.join().unwrap())
            .collect();
        accepted.sort_unstable();

        let mut resolved = Vec::new();
        loop {
            match next_event(&mut events).await {
                SessionEvent::Failed { id, .. } | SessionEvent::Result { id, .. } => resolved.push(id),
                SessionEvent::Exited { .. } => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        resolved.sort_unstable();

        assert_eq!(resolved, accepted, "every accepted id resolves exactly once");
        assert_eq!(session.pending_count(), 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), events.recv())
                .await
                .map_or(true, |event| event.is_none()),
            "no events after Exited"
        );
    }

    #[tokio::test]
    async fn test_orphaned_requests_cancelled_when_process_dies() {
        let descriptor = ProcessDescriptor::new("sh").args(["-c", "read line; exit 7"]);
        let (session, mut events) = ClientSession::spawn(descriptor, SessionOptions::default())
            .await
            .unwrap();

        for n in 0..3 {
            session
                .hover(Path::new("/p/a.cpp"), Position::new(n, 0))
                .unwrap();
        }

        let mut cancelled = 0;
        loop {
            match next_event(&mut events).await {
                SessionEvent::Failed {
                    failure: RequestFailure::Cancelled { .. },
                    ..
                } => cancelled += 1,
                SessionEvent::Exited { .. } => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(cancelled, 3);
        assert_eq!(session.state(), SessionState::Exited);
    }

    #[tokio::test]
    async fn test_protocol_error_is_tagged_with_method() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        let id = session
            .rename(Path::new("/p/a.cpp"), Position::new(3, 1), "renamed")
            .unwrap();
        let request = backend.recv().await;
        assert_eq!(request["params"]["newName"], "renamed");

        backend
            .send_raw(&format!(
                r#"{{"jsonrpc":"2.0","id":{id},"error":{{"code":-32602,"message":"invalid name"}}}}"#
            ))
            .await;

        match next_event(&mut events).await {
            SessionEvent::Failed {
                id: failed,
                method,
                failure: RequestFailure::Protocol { code, message },
                ..
            } => {
                assert_eq!(failed, id);
                assert_eq!(method, "textDocument/rename");
                assert_eq!(code, -32602);
                assert_eq!(message, "invalid name");
            }
            other => panic!("expected protocol failure, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_garbage_and_stale_messages_are_dropped() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        backend.send_bytes(b"clangd: stray output\r\n\r\n").await;
        backend.send_bytes(b"Content-Length: 6\r\n\r\n{\"\xC3\x28\"}").await;
        backend.send_raw("{not json").await;
        backend.send_raw(r#"{"jsonrpc":"2.0","id":999,"result":[]}"#).await;
        backend
            .send_raw(r#"{"jsonrpc":"2.0","id":998,"error":{"code":-32603,"message":"late"}}"#)
            .await;

        let id = session.document_highlight(Path::new("/p/a.cpp"), Position::new(2, 2)).unwrap();
        backend.recv().await;
        backend
            .respond(
                &json!(id),
                json!([{"range": {"start": {"line": 2, "character": 0}, "end": {"line": 2, "character": 4}}, "kind": 2}]),
            )
            .await;

        match next_event(&mut events).await {
            SessionEvent::Result {
                id: got,
                result: DecodedResult::DocumentHighlights(highlights),
                ..
            } => {
                assert_eq!(got, id);
                assert_eq!(highlights.len(), 1);
            }
            other => panic!("expected highlights, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_undecodable_result_fails_request() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        let id = session.semantic_tokens_full(Path::new("/p/a.cpp")).unwrap();
        backend.recv().await;
        backend.respond(&json!(id), json!({"data": [1, 2, 3]})).await;

        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Failed { failure: RequestFailure::UndecodableResult { .. }, .. }
        ));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_initialize_only_once_and_capabilities_cached() {
        let (session, _events, mut backend) = ready_session(SessionOptions::default()).await;

        let capabilities = session.capabilities().expect("capabilities cached");
        assert!(advertised(&capabilities.capabilities.definition_provider));
        assert!(!advertised(&capabilities.capabilities.references_provider));
        assert!(session.wait_initialized().await.is_ok());

        let request = session.options().initialize_request(Path::new("/p"), None);
        assert!(matches!(
            session.initialize(&request),
            Err(LspError::AlreadyInitialized)
        ));

        session.hover(Path::new("/p/a.cpp"), Position::new(0, 0)).unwrap();
        assert_eq!(backend.recv().await["method"], "textDocument/hover");
    }

    #[tokio::test]
    async fn test_requests_allowed_before_initialize_completes() {
        let (transport, mut backend) = stub::pair();
        let (session, mut events) = ClientSession::attach(transport, SessionOptions::default());

        let request = session.options().initialize_request(Path::new("/p"), None);
        let init_id = session.initialize(&request).unwrap();
        let hover_id = session.hover(Path::new("/p/a.cpp"), Position::new(0, 0)).unwrap();
        assert_eq!(session.state(), SessionState::AwaitingInitializeResult);

        let init = backend.recv().await;
        let hover = backend.recv().await;
        assert_eq!(init["id"], init_id);
        assert_eq!(hover["id"], hover_id);

        backend.respond(&hover["id"], json!({"contents": "x"})).await;
        backend.respond(&init["id"], json!({"capabilities": {}})).await;

        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Result { result: DecodedResult::Hover(Some(_)), .. }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Result { result: DecodedResult::Initialize(_), .. }
        ));
        assert_eq!(backend.recv().await["method"], "initialized");
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_did_change_versions_are_monotonic() {
        let (session, _events, mut backend) = ready_session(SessionOptions::default()).await;
        let path = Path::new("/p/a.cpp");

        assert!(matches!(
            session.did_change(path, "x"),
            Err(LspError::DocumentNotOpen(_))
        ));

        session.did_open(path, "int a;").unwrap();
        let open = backend.recv().await;
        assert_eq!(open["params"]["textDocument"]["languageId"], "cpp");
        let mut last = open["params"]["textDocument"]["version"].as_i64().unwrap();

        for n in 0..20 {
            let text = "y".repeat(n * 97);
            session.did_change(path, &text).unwrap();
            let change = backend.recv().await;
            let version = change["params"]["textDocument"]["version"].as_i64().unwrap();
            assert_eq!(version, last + 1);
            last = version;
        }

        session.did_close(path).unwrap();
        backend.recv_method("textDocument/didClose").await;
        session.did_open(path, "").unwrap();
        let reopened = backend.recv().await;
        assert_eq!(reopened["params"]["textDocument"]["version"], 1);
    }

    #[tokio::test]
    async fn test_ensure_document_sends_only_when_changed() {
        let (session, _events, mut backend) = ready_session(SessionOptions::default()).await;
        let path = Path::new("/p/b.py");

        assert!(matches!(
            session.ensure_document(path, "a = 1").unwrap(),
            DocumentSync::Open { .. }
        ));
        assert_eq!(backend.recv().await["method"], "textDocument/didOpen");

        assert_eq!(
            session.ensure_document(path, "a = 1").unwrap(),
            DocumentSync::Unchanged
        );
        assert_eq!(
            session.ensure_document(path, "a = 2").unwrap(),
            DocumentSync::Change { version: 2 }
        );
        let change = backend.recv().await;
        assert_eq!(change["method"], "textDocument/didChange");
        assert_eq!(change["params"]["contentChanges"][0]["text"], "a = 2");
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let (_session, _events, mut backend) = ready_session(SessionOptions::default()).await;

        backend
            .send_raw(r#"{"jsonrpc":"2.0","id":"p1","method":"window/workDoneProgress/create","params":{"token":"idx"}}"#)
            .await;
        let reply = backend.recv().await;
        assert_eq!(reply["id"], "p1");
        assert!(reply.get("result").is_some_and(Value::is_null));

        backend
            .send_raw(r#"{"jsonrpc":"2.0","id":5,"method":"workspace/applyEdit","params":{}}"#)
            .await;
        let reply = backend.recv().await;
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_raw_mode_passes_results_through() {
        let options = SessionOptions::default().with_decode_mode(DecodeMode::Raw);
        let (session, mut events, mut backend) = ready_session(options).await;

        let id = session.hover(Path::new("/p/a.cpp"), Position::new(0, 0)).unwrap();
        backend.recv().await;
        backend.respond(&json!(id), json!({"contents": 42})).await;

        match next_event(&mut events).await {
            SessionEvent::Result {
                result: DecodedResult::Raw(value),
                ..
            } => assert_eq!(value, json!({"contents": 42})),
            other => panic!("expected raw result, got {other:?}"),
        }

        backend
            .send_raw(r#"{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{"uri":"file:///p/a.cpp","diagnostics":[]}}"#)
            .await;
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Notification { ref method, .. } if method == "textDocument/publishDiagnostics"
        ));
    }

    #[tokio::test]
    async fn test_shutdown_and_exit() {
        let (session, mut events, mut backend) = ready_session(SessionOptions::default()).await;

        let id = session.shutdown().unwrap();
        assert_eq!(session.state(), SessionState::ShuttingDown);
        backend.recv_method("shutdown").await;
        backend.respond(&json!(id), Value::Null).await;
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Result { result: DecodedResult::Shutdown, .. }
        ));

        session.exit().unwrap();
        backend.recv_method("exit").await;
        assert!(matches!(next_event(&mut events).await, SessionEvent::Exited { .. }));
        assert!(session.is_exited());
    }

    #[tokio::test]
    async fn test_select_lsp_server_sent_only_on_change() {
        let (transport, mut backend) = stub::pair();
        let (session, _events) = ClientSession::attach(transport, SessionOptions::default());
        let cpp = ProjectKey::new("cpp", "/p", "/p/build");
        let py = ProjectKey::new("python", "/p", "");

        assert!(session.select_lsp_server(&cpp).unwrap());
        assert!(!session.select_lsp_server(&cpp).unwrap());
        assert!(session.select_lsp_server(&py).unwrap());

        let first = backend.recv().await;
        assert_eq!(first["method"], "selectLspServer");
        assert_eq!(first["params"]["language"], "cpp");
        assert!(first.get("id").is_none());
        let second = backend.recv().await;
        assert_eq!(second["params"]["language"], "python");
    }

    #[tokio::test]
    async fn test_wait_initialized_fails_when_session_ends() {
        let (transport, backend) = stub::pair();
        let (session, _events) = ClientSession::attach(transport, SessionOptions::default());
        let request = session.options().initialize_request(Path::new("/p"), None);
        session.initialize(&request).unwrap();

        backend.hang_up().await;
        assert!(matches!(
            session.wait_initialized().await,
            Err(RequestFailure::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_relative_paths_are_rejected_before_sending() {
        let (transport, _backend) = stub::pair();
        let (session, _events) = ClientSession::attach(transport, SessionOptions::default());

        assert!(matches!(
            session.hover(Path::new("relative.cpp"), Position::new(0, 0)),
            Err(LspError::InvalidPath(_))
        ));
        assert_eq!(session.pending_count(), 0);
    }
}
