use crate::io::process::ProcessError;
use crate::lsp::pending::PendingError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned synchronously by session operations
///
/// Request outcomes are not errors of this kind: they arrive later as
/// session events carrying a [`RequestFailure`].
#[derive(Error, Debug)]
pub enum LspError {
    #[error("Backend process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Session has exited")]
    SessionExited,

    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Path is not absolute and cannot become a file URI: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Document not open: {}", .0.display())]
    DocumentNotOpen(PathBuf),

    #[error(transparent)]
    Pending(#[from] PendingError),

    #[error("Failed to encode params: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a request did not produce a decoded result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestFailure {
    /// The backend answered with a JSON-RPC error object
    #[error("backend error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// The session ended before an answer arrived
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// The answer did not have the shape its method promises
    #[error("undecodable result: {reason}")]
    UndecodableResult { reason: String },
}
