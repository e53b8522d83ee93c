//! JSON-RPC 2.0 envelope layer
//!
//! Encoding is total: every constructor yields wire text. Decoding classifies
//! arbitrary inbound text into exactly one [`Envelope`] variant and never
//! fails; unusable input becomes [`Envelope::Malformed`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names used by the session and the gateway
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_CLOSE: &str = "textDocument/didClose";
    pub const DEFINITION: &str = "textDocument/definition";
    pub const REFERENCES: &str = "textDocument/references";
    pub const COMPLETION: &str = "textDocument/completion";
    pub const SIGNATURE_HELP: &str = "textDocument/signatureHelp";
    pub const HOVER: &str = "textDocument/hover";
    pub const DOCUMENT_HIGHLIGHT: &str = "textDocument/documentHighlight";
    pub const DOCUMENT_SYMBOL: &str = "textDocument/documentSymbol";
    pub const SEMANTIC_TOKENS_FULL: &str = "textDocument/semanticTokens/full";
    pub const RENAME: &str = "textDocument/rename";
    pub const FORMATTING: &str = "textDocument/formatting";
    pub const RANGE_FORMATTING: &str = "textDocument/rangeFormatting";
    /// clangd extension
    pub const SWITCH_SOURCE_HEADER: &str = "textDocument/switchSourceHeader";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
    pub const WORK_DONE_PROGRESS_CREATE: &str = "window/workDoneProgress/create";
    /// Gateway extension: choose the backend for subsequent traffic
    pub const SELECT_LSP_SERVER: &str = "selectLspServer";
}

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i64,
            message: message.into(),
            data: None,
        }
    }
}

/// Error codes from JSON-RPC 2.0 and the LSP extension range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum JsonRpcErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    /// LSP: server received a request before `initialize`
    ServerNotInitialized = -32002,
    /// LSP: request cancelled by the client
    RequestCancelled = -32800,
}

impl JsonRpcErrorCode {
    /// Check if the given code is in the server error range (-32099 to -32000)
    pub fn is_server_error(code: i64) -> bool {
        (-32099..=-32000).contains(&code)
    }
}

/// One classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Has an `error` member. The id may be null when the peer could not
    /// parse our request.
    Error {
        id: Option<Value>,
        error: JsonRpcErrorObject,
    },
    /// Has a `result` member (possibly `null`) and an id
    Response { id: Value, result: Value },
    /// Has `method` and no id
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Has `method` and an id: the peer expects an answer
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Anything else
    Malformed { reason: String },
}

impl Envelope {
    /// Method name for notifications and requests
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Notification { method, .. } | Envelope::Request { method, .. } => {
                Some(method)
            }
            _ => None,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Request with an integer id
pub fn encode_request(id: u64, method: &str, params: Option<&Value>) -> String {
    encode_request_with_id(&Value::from(id), method, params)
}

/// Request with an arbitrary id, used when relaying an editor's id verbatim
pub fn encode_request_with_id(id: &Value, method: &str, params: Option<&Value>) -> String {
    let mut message = Map::new();
    message.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    message.insert("id".into(), id.clone());
    message.insert("method".into(), Value::from(method));
    if let Some(params) = params {
        message.insert("params".into(), params.clone());
    }
    Value::Object(message).to_string()
}

/// Notification: never carries an id
pub fn encode_notification(method: &str, params: Option<&Value>) -> String {
    let mut message = Map::new();
    message.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    message.insert("method".into(), Value::from(method));
    if let Some(params) = params {
        message.insert("params".into(), params.clone());
    }
    Value::Object(message).to_string()
}

/// Successful response; `result` is always present, `null` included
pub fn encode_response(id: &Value, result: &Value) -> String {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }).to_string()
}

pub fn encode_error_response(id: &Value, error: &JsonRpcErrorObject) -> String {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }).to_string()
}

// ============================================================================
// Decoding
// ============================================================================

/// Classify inbound text
///
/// Order: `error` member, then `result` with an id, then `method` without
/// an id (notification), then `method` with an id (server request).
pub fn decode(text: &str) -> Envelope {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            return Envelope::Malformed {
                reason: format!("invalid JSON: {e}"),
            };
        }
    };
    classify(value)
}

/// Classify an already-parsed JSON value
pub fn classify(value: Value) -> Envelope {
    let Value::Object(mut object) = value else {
        return Envelope::Malformed {
            reason: "payload is not a JSON object".to_string(),
        };
    };

    let id = object.remove("id").filter(is_valid_id);

    if let Some(error) = object.remove("error") {
        return match serde_json::from_value::<JsonRpcErrorObject>(error) {
            Ok(error) => Envelope::Error { id, error },
            Err(e) => Envelope::Malformed {
                reason: format!("unreadable error object: {e}"),
            },
        };
    }

    if let Some(result) = object.remove("result") {
        return match id {
            Some(id) => Envelope::Response { id, result },
            None => Envelope::Malformed {
                reason: "result without id".to_string(),
            },
        };
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        Some(_) => {
            return Envelope::Malformed {
                reason: "method is not a string".to_string(),
            };
        }
        None => {
            return Envelope::Malformed {
                reason: "no error, result or method member".to_string(),
            };
        }
    };
    let params = object.remove("params");

    match id {
        None => Envelope::Notification { method, params },
        Some(id) => Envelope::Request { id, method, params },
    }
}

/// JSON-RPC ids are integers or strings; `null` counts as absent
fn is_valid_id(id: &Value) -> bool {
    matches!(id, Value::Number(_) | Value::String(_))
}

/// Interpret an id as the integer ids this crate allocates
pub fn id_as_u64(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
