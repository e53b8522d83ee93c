//! Editor-facing gateway process
//!
//! The editor talks LSP to the gateway over stdio or TCP and picks a backend
//! with a `selectLspServer` notification. Every backend is initialized once
//! by the router; the editor's own `initialize` is answered from that
//! cached result and its `initialized` is dropped. Requests are forwarded
//! with fresh backend ids and answers are mapped back to the editor's ids.

use crate::io::transport::{StreamTransport, Transport};
use crate::lsp::error::RequestFailure;
use crate::lsp::framing::LspFraming;
use crate::lsp::params::uri_to_path;
use crate::lsp::protocol::{self, Envelope, JsonRpcErrorCode, JsonRpcErrorObject, methods};
use crate::lsp::session::{DecodeMode, SessionEvent, SessionOptions};
use crate::lsp::types::DecodedResult;
use crate::router::backend::{BackendLauncher, BackendRouter, OutboundCall, RouterError, RouterEvent};
use crate::router::key::ProjectKey;
use crate::log_lsp_message;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};

const CANCEL_REQUEST: &str = "$/cancelRequest";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write to editor: {0}")]
    EditorWrite(String),
}

/// Why [`Gateway::serve`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    EditorDisconnected,
    ExitRequested,
}

enum Flow {
    Continue,
    Exit,
}

enum Io<E> {
    Editor(Result<String, E>),
    Backend(Option<RouterEvent>),
}

impl From<&RequestFailure> for JsonRpcErrorObject {
    fn from(failure: &RequestFailure) -> Self {
        match failure {
            RequestFailure::Protocol { code, message } => JsonRpcErrorObject {
                code: *code,
                message: message.clone(),
                data: None,
            },
            RequestFailure::Cancelled { reason } => {
                JsonRpcErrorObject::new(JsonRpcErrorCode::RequestCancelled, reason.clone())
            }
            RequestFailure::UndecodableResult { reason } => {
                JsonRpcErrorObject::new(JsonRpcErrorCode::InternalError, reason.clone())
            }
        }
    }
}

pub struct Gateway {
    router: BackendRouter,
    events: mpsc::UnboundedReceiver<RouterEvent>,
    /// (backend, launch, backend id) -> editor id
    inflight: HashMap<(ProjectKey, u64, u64), Value>,
    /// Editor `initialize` ids waiting for a backend handshake, per launch
    awaiting_initialize: HashMap<(ProjectKey, u64), Vec<Value>>,
}

impl Gateway {
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Self {
        let options = SessionOptions::default().with_decode_mode(DecodeMode::Raw);
        let (router, events) = BackendRouter::new(launcher, options);
        Self {
            router,
            events,
            inflight: HashMap::new(),
            awaiting_initialize: HashMap::new(),
        }
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    /// Serve one editor connection until it disconnects or sends `exit`
    pub async fn serve<T: Transport + 'static>(
        &mut self,
        transport: T,
    ) -> Result<ServeOutcome, GatewayError> {
        let mut editor = LspFraming::new(transport);

        let outcome = loop {
            let io = tokio::select! {
                received = editor.receive() => Io::Editor(received),
                event = self.events.recv() => Io::Backend(event),
            };

            let outgoing = match io {
                Io::Editor(Ok(text)) => {
                    let (outgoing, flow) = self.handle_editor(&text).await;
                    if let Flow::Exit = flow {
                        send_all(&mut editor, outgoing).await?;
                        break ServeOutcome::ExitRequested;
                    }
                    outgoing
                }
                Io::Editor(Err(e)) => {
                    info!("Editor connection closed: {}", e);
                    break ServeOutcome::EditorDisconnected;
                }
                Io::Backend(Some(event)) => self.handle_backend(event),
                // The router holds a sender, so this only happens on teardown
                Io::Backend(None) => break ServeOutcome::EditorDisconnected,
            };
            send_all(&mut editor, outgoing).await?;
        };

        self.inflight.clear();
        self.awaiting_initialize.clear();
        let _ = editor.close().await;
        Ok(outcome)
    }

    /// Shut down every backend
    pub async fn shutdown(&self) {
        self.router.close_all().await;
    }

    async fn handle_editor(&mut self, text: &str) -> (Vec<String>, Flow) {
        let envelope = protocol::decode(text);
        log_lsp_message!(
            Level::DEBUG,
            "editor",
            envelope.method().unwrap_or("<response>"),
            text
        );

        match envelope {
            Envelope::Notification { method, params } => {
                self.editor_notification(method, params).await
            }
            Envelope::Request { id, method, params } => {
                (self.editor_request(id, method, params).await, Flow::Continue)
            }
            Envelope::Response { id, .. } | Envelope::Error { id: Some(id), .. } => {
                debug!("Ignoring editor response for id {}", id);
                (Vec::new(), Flow::Continue)
            }
            Envelope::Error { id: None, error } => {
                debug!("Ignoring editor error: {}", error.message);
                (Vec::new(), Flow::Continue)
            }
            Envelope::Malformed { reason } => {
                warn!("Dropping malformed editor message: {}", reason);
                (Vec::new(), Flow::Continue)
            }
        }
    }

    async fn editor_notification(&mut self, method: String, params: Option<Value>) -> (Vec<String>, Flow) {
        match method.as_str() {
            methods::SELECT_LSP_SERVER => {
                let key = params.as_ref().and_then(ProjectKey::from_select_params);
                match key {
                    Some(key) => {
                        if let Err(e) = self.router.select(&key).await {
                            error!("Failed to select backend {}: {}", key, e);
                        }
                    }
                    None => warn!("selectLspServer without language and workspace: {:?}", params),
                }
            }
            methods::INITIALIZED => debug!("Backend already initialized, dropping editor 'initialized'"),
            methods::EXIT => {
                info!("Editor requested exit");
                return (Vec::new(), Flow::Exit);
            }
            CANCEL_REQUEST => self.cancel_request(params).await,
            _ => {
                let call = OutboundCall::Notification { method, params };
                match self.router.dispatch(call).await {
                    Ok(_) => {}
                    Err(RouterError::NoActiveBackend) => {
                        debug!("No backend selected, dropping notification")
                    }
                    Err(e) => warn!("Failed to forward notification: {}", e),
                }
            }
        }
        (Vec::new(), Flow::Continue)
    }

    /// Translate an editor cancellation to the backend's id
    async fn cancel_request(&mut self, params: Option<Value>) {
        let Some(editor_id) = params.as_ref().and_then(|params| params.get("id")) else {
            return;
        };
        let target = self
            .inflight
            .iter()
            .find(|(_, id)| *id == editor_id)
            .map(|((key, launch, backend_id), _)| (key.clone(), *launch, *backend_id));

        let Some((key, launch, backend_id)) = target else {
            debug!("Cancel for unknown editor request {}", editor_id);
            return;
        };
        if let Some(session) = self.router.launched_session(&key, launch).await {
            if let Err(e) = session.notify(CANCEL_REQUEST, Some(json!({ "id": backend_id }))) {
                debug!("Cancel not forwarded to {}: {}", key, e);
            }
        }
    }

    async fn editor_request(&mut self, id: Value, method: String, params: Option<Value>) -> Vec<String> {
        match method.as_str() {
            methods::INITIALIZE => self.editor_initialize(id).await,
            // Backends stay warm until the editor exits
            methods::SHUTDOWN => vec![protocol::encode_response(&id, &Value::Null)],
            _ => {
                let context = params
                    .as_ref()
                    .and_then(|params| params.pointer("/textDocument/uri"))
                    .and_then(Value::as_str)
                    .and_then(uri_to_path);
                self.forward_request(id, method, params, context).await
            }
        }
    }

    async fn editor_initialize(&mut self, id: Value) -> Vec<String> {
        let active = match self.router.active_session().await {
            Ok(active) => active,
            Err(RouterError::NoActiveBackend) => return vec![not_selected(&id)],
            Err(e) => return vec![internal_error(&id, &e)],
        };

        match active.session.capabilities() {
            Some(outcome) => vec![protocol::encode_response(&id, &outcome.raw)],
            None => {
                debug!("Editor initialize waits for backend {}", active.key);
                self.awaiting_initialize
                    .entry((active.key, active.launch))
                    .or_default()
                    .push(id);
                Vec::new()
            }
        }
    }

    async fn forward_request(
        &mut self,
        id: Value,
        method: String,
        params: Option<Value>,
        context: Option<PathBuf>,
    ) -> Vec<String> {
        let call = OutboundCall::Request {
            method,
            params,
            context,
        };
        match self.router.dispatch(call).await {
            Ok(dispatched) => {
                if dispatched.relaunched {
                    info!("Forwarding to relaunched backend {}", dispatched.key);
                }
                if let Some(backend_id) = dispatched.id {
                    self.inflight
                        .insert((dispatched.key, dispatched.launch, backend_id), id);
                }
                Vec::new()
            }
            Err(RouterError::NoActiveBackend) => vec![not_selected(&id)],
            Err(e) => vec![internal_error(&id, &e)],
        }
    }

    fn handle_backend(&mut self, RouterEvent { key, launch, event }: RouterEvent) -> Vec<String> {
        match event {
            SessionEvent::Result {
                id, method, result, ..
            } => {
                if method == methods::INITIALIZE {
                    let waiting = self
                        .awaiting_initialize
                        .remove(&(key, launch))
                        .unwrap_or_default();
                    let DecodedResult::Initialize(outcome) = result else {
                        return Vec::new();
                    };
                    return waiting
                        .iter()
                        .map(|editor_id| protocol::encode_response(editor_id, &outcome.raw))
                        .collect();
                }

                let Some(editor_id) = self.inflight.remove(&(key.clone(), launch, id)) else {
                    debug!("{} answered id {} nobody is waiting for", key, id);
                    return Vec::new();
                };
                let value = match result {
                    DecodedResult::Raw(value) => value,
                    other => {
                        warn!("Unexpected typed result for {}: {:?}", method, other);
                        Value::Null
                    }
                };
                vec![protocol::encode_response(&editor_id, &value)]
            }
            SessionEvent::Failed {
                id, method, failure, ..
            } => {
                let error = JsonRpcErrorObject::from(&failure);
                let editor_ids = if method == methods::INITIALIZE {
                    self.awaiting_initialize
                        .remove(&(key, launch))
                        .unwrap_or_default()
                } else {
                    self.inflight.remove(&(key, launch, id)).into_iter().collect()
                };
                editor_ids
                    .iter()
                    .map(|editor_id| protocol::encode_error_response(editor_id, &error))
                    .collect()
            }
            SessionEvent::Notification { method, params } => {
                vec![protocol::encode_notification(&method, params.as_ref())]
            }
            SessionEvent::Diagnostics(batch) => {
                debug!("Typed diagnostics for {} not forwarded", batch.uri.as_str());
                Vec::new()
            }
            SessionEvent::Exited { reason } => {
                warn!("Backend {} exited: {}", key, reason);
                let error = JsonRpcErrorObject::new(JsonRpcErrorCode::RequestCancelled, reason);
                self.awaiting_initialize
                    .remove(&(key, launch))
                    .unwrap_or_default()
                    .iter()
                    .map(|editor_id| protocol::encode_error_response(editor_id, &error))
                    .collect()
            }
        }
    }
}

fn not_selected(id: &Value) -> String {
    protocol::encode_error_response(
        id,
        &JsonRpcErrorObject::new(
            JsonRpcErrorCode::ServerNotInitialized,
            "No backend selected: send selectLspServer first",
        ),
    )
}

fn internal_error(id: &Value, error: &RouterError) -> String {
    protocol::encode_error_response(
        id,
        &JsonRpcErrorObject::new(JsonRpcErrorCode::InternalError, error.to_string()),
    )
}

async fn send_all<T: Transport>(
    editor: &mut LspFraming<T>,
    messages: Vec<String>,
) -> Result<(), GatewayError> {
    for message in messages {
        log_lsp_message!(Level::DEBUG, "to_editor", "<gateway>", message);
        editor
            .send(&message)
            .await
            .map_err(|e| GatewayError::EditorWrite(e.to_string()))?;
    }
    Ok(())
}

/// Serve the editor on this process's stdin/stdout
pub async fn serve_stdio(gateway: &mut Gateway) -> Result<ServeOutcome, GatewayError> {
    info!("Serving editor on stdio");
    let transport = StreamTransport::new(tokio::io::stdin(), tokio::io::stdout());
    gateway.serve(transport).await
}

/// Accept editor connections on `127.0.0.1:port`, one at a time, until an
/// editor sends `exit`
pub async fn serve_tcp(gateway: &mut Gateway, port: u16) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|source| GatewayError::Bind { port, source })?;
    info!("Listening for editors on 127.0.0.1:{}", port);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Editor connected from {}", peer);
        let (reader, writer) = stream.into_split();
        match gateway.serve(StreamTransport::new(reader, writer)).await? {
            ServeOutcome::ExitRequested => return Ok(()),
            ServeOutcome::EditorDisconnected => info!("Editor {} disconnected", peer),
        }
    }
}
