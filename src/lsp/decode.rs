//! Per-method result decoders
//!
//! LSP results do not describe their own shape, so the decoder is chosen by
//! the method recorded against the request id. Each decoder maps the loose
//! wire JSON onto one variant of [`DecodedResult`], picking the variant from
//! the JSON itself before handing the pieces to lsp-types.

use crate::lsp::params::uri_to_path;
use crate::lsp::protocol::methods;
use crate::lsp::types::{Completions, DecodedResult, InitializeOutcome, SemanticTokensCapability};
use lsp_types::{
    AnnotatedTextEdit, ChangeAnnotation, CreateFile, DeleteFile, DocumentChangeOperation,
    DocumentChanges, DocumentHighlight, DocumentSymbol, DocumentSymbolResponse,
    GotoDefinitionResponse, Hover, HoverContents, LanguageString, Location, LocationLink,
    MarkedString, MarkupContent, OneOf, OptionalVersionedTextDocumentIdentifier,
    PublishDiagnosticsParams, Range, RenameFile, ResourceOp, SemanticTokens, ServerCapabilities,
    ServerInfo, SignatureHelp, SymbolInformation, TextDocumentEdit, TextEdit, Uri, WorkspaceEdit,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A result that does not fit the shape its method promises
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

type DecodeResult<T> = Result<T, DecodeError>;

fn from_value<T: DeserializeOwned>(value: Value, what: &str) -> DecodeResult<T> {
    serde_json::from_value(value).map_err(|e| DecodeError(format!("{what}: {e}")))
}

fn expect_array(value: Value, what: &str) -> DecodeResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(DecodeError(format!(
            "{what}: expected array, found {}",
            kind_of(&other)
        ))),
    }
}

fn expect_object(value: Value, what: &str) -> DecodeResult<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(DecodeError(format!(
            "{what}: expected object, found {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode `result` with the decoder registered for `method`
///
/// Methods without a decoder come back as [`DecodedResult::Raw`].
pub fn decode_result(method: &str, result: Value) -> DecodeResult<DecodedResult> {
    match method {
        methods::INITIALIZE => decode_initialize(result).map(DecodedResult::Initialize),
        methods::DEFINITION => decode_definition(result).map(DecodedResult::Definition),
        methods::REFERENCES => decode_locations(result).map(DecodedResult::References),
        methods::COMPLETION => decode_completion(result).map(DecodedResult::Completion),
        methods::SIGNATURE_HELP => decode_signature_help(result).map(DecodedResult::SignatureHelp),
        methods::HOVER => decode_hover(result).map(DecodedResult::Hover),
        methods::DOCUMENT_HIGHLIGHT => {
            decode_highlights(result).map(DecodedResult::DocumentHighlights)
        }
        methods::DOCUMENT_SYMBOL => decode_document_symbols(result).map(DecodedResult::DocumentSymbols),
        methods::SEMANTIC_TOKENS_FULL => {
            decode_semantic_tokens(result).map(DecodedResult::SemanticTokens)
        }
        methods::RENAME => decode_optional_workspace_edit(result).map(DecodedResult::Rename),
        methods::FORMATTING | methods::RANGE_FORMATTING => {
            decode_text_edits(result).map(DecodedResult::Formatting)
        }
        methods::SWITCH_SOURCE_HEADER => {
            decode_switch_source_header(result).map(DecodedResult::SwitchHeaderSource)
        }
        methods::SHUTDOWN => Ok(DecodedResult::Shutdown),
        _ => Ok(DecodedResult::Raw(result)),
    }
}

// ============================================================================
// Initialize
// ============================================================================

/// A `capabilities` object is required. If it does not fit the typed model
/// the typed view falls back to the defaults; `raw` still carries it whole.
pub fn decode_initialize(result: Value) -> DecodeResult<InitializeOutcome> {
    let Some(object) = result.as_object() else {
        return Err(DecodeError(format!(
            "initialize: expected object, found {}",
            kind_of(&result)
        )));
    };

    let capabilities = match object.get("capabilities") {
        Some(capabilities @ Value::Object(_)) => {
            match serde_json::from_value::<ServerCapabilities>(capabilities.clone()) {
                Ok(capabilities) => capabilities,
                Err(e) => {
                    warn!("initialize: capabilities do not fit the LSP model: {}", e);
                    ServerCapabilities::default()
                }
            }
        }
        _ => return Err(DecodeError("initialize: missing capabilities".to_string())),
    };

    let server_info = match object.get("serverInfo") {
        Some(info @ Value::Object(_)) => Some(from_value::<ServerInfo>(info.clone(), "serverInfo")?),
        _ => None,
    };

    let semantic_tokens = SemanticTokensCapability::from_server(&capabilities);

    Ok(InitializeOutcome {
        raw: result,
        capabilities,
        server_info,
        semantic_tokens,
    })
}

// ============================================================================
// Navigation
// ============================================================================

/// `Location | Location[] | LocationLink[] | null`; `None` for null or `[]`
pub fn decode_definition(result: Value) -> DecodeResult<Option<GotoDefinitionResponse>> {
    match result {
        Value::Null => Ok(None),
        Value::Object(_) if result.get("targetUri").is_some() => Ok(Some(
            GotoDefinitionResponse::Link(vec![from_value::<LocationLink>(result, "definition link")?]),
        )),
        Value::Object(_) => Ok(Some(GotoDefinitionResponse::Scalar(from_value::<Location>(
            result,
            "definition location",
        )?))),
        Value::Array(items) => {
            let Some(first) = items.first() else {
                return Ok(None);
            };
            if first.get("targetUri").is_some() {
                from_value::<Vec<LocationLink>>(Value::Array(items), "definition links")
                    .map(|links| Some(GotoDefinitionResponse::Link(links)))
            } else {
                from_value::<Vec<Location>>(Value::Array(items), "definition locations")
                    .map(|locations| Some(GotoDefinitionResponse::Array(locations)))
            }
        }
        other => Err(DecodeError(format!(
            "definition: unexpected {}",
            kind_of(&other)
        ))),
    }
}

/// `Location[] | null`
pub fn decode_locations(result: Value) -> DecodeResult<Vec<Location>> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    from_value(Value::Array(expect_array(result, "locations")?), "locations")
}

pub fn decode_highlights(result: Value) -> DecodeResult<Vec<DocumentHighlight>> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    from_value(
        Value::Array(expect_array(result, "documentHighlight")?),
        "documentHighlight",
    )
}

/// `SymbolInformation[] | DocumentSymbol[] | null`, told apart by whether the
/// first element carries a `range`
pub fn decode_document_symbols(result: Value) -> DecodeResult<DocumentSymbolResponse> {
    if result.is_null() {
        return Ok(DocumentSymbolResponse::Flat(Vec::new()));
    }
    let items = expect_array(result, "documentSymbol")?;

    let nested = items
        .first()
        .is_some_and(|first| first.get("range").is_some());

    if nested {
        from_value::<Vec<DocumentSymbol>>(Value::Array(items), "document symbols")
            .map(DocumentSymbolResponse::Nested)
    } else {
        from_value::<Vec<SymbolInformation>>(Value::Array(items), "symbol information")
            .map(DocumentSymbolResponse::Flat)
    }
}

// ============================================================================
// Hover, completion and signature help
// ============================================================================

pub fn decode_hover(result: Value) -> DecodeResult<Option<Hover>> {
    let mut object = match result {
        Value::Null => return Ok(None),
        other => expect_object(other, "hover")?,
    };

    let contents = match object.remove("contents") {
        Some(Value::String(text)) => HoverContents::Scalar(MarkedString::String(text)),
        Some(Value::Array(items)) => HoverContents::Array(from_value(
            Value::Array(items),
            "hover marked strings",
        )?),
        Some(value @ Value::Object(_)) if value.get("kind").is_some() => {
            HoverContents::Markup(from_value::<MarkupContent>(value, "hover markup")?)
        }
        Some(value @ Value::Object(_)) => HoverContents::Scalar(MarkedString::LanguageString(
            from_value::<LanguageString>(value, "hover marked string")?,
        )),
        Some(other) => {
            return Err(DecodeError(format!(
                "hover contents: unexpected {}",
                kind_of(&other)
            )));
        }
        None => return Err(DecodeError("hover: missing contents".to_string())),
    };

    let range = match object.remove("range") {
        None | Some(Value::Null) => None,
        Some(range) => Some(from_value::<Range>(range, "hover range")?),
    };

    Ok(Some(Hover { contents, range }))
}

/// `CompletionList | CompletionItem[] | null`
pub fn decode_completion(result: Value) -> DecodeResult<Completions> {
    match result {
        Value::Null => Ok(Completions {
            is_incomplete: false,
            items: Vec::new(),
        }),
        Value::Array(items) => Ok(Completions {
            is_incomplete: false,
            items: from_value(Value::Array(items), "completion items")?,
        }),
        Value::Object(object) => {
            if !object.contains_key("items") {
                return Err(DecodeError("completion list: missing items".to_string()));
            }
            from_value(Value::Object(object), "completion list")
        }
        other => Err(DecodeError(format!(
            "completion: unexpected {}",
            kind_of(&other)
        ))),
    }
}

pub fn decode_signature_help(result: Value) -> DecodeResult<Option<SignatureHelp>> {
    if result.is_null() {
        return Ok(None);
    }
    from_value(result, "signatureHelp").map(Some)
}

// ============================================================================
// Semantic tokens
// ============================================================================

pub fn decode_semantic_tokens(result: Value) -> DecodeResult<Option<SemanticTokens>> {
    let object = match result {
        Value::Null => return Ok(None),
        other => expect_object(other, "semanticTokens")?,
    };
    if !object.contains_key("data") {
        return Err(DecodeError("semanticTokens: missing data".to_string()));
    }
    from_value(Value::Object(object), "semanticTokens").map(Some)
}

// ============================================================================
// Edits
// ============================================================================

pub fn decode_text_edits(result: Value) -> DecodeResult<Vec<TextEdit>> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    from_value(Value::Array(expect_array(result, "text edits")?), "text edits")
}

pub fn decode_optional_workspace_edit(result: Value) -> DecodeResult<Option<WorkspaceEdit>> {
    if result.is_null() {
        return Ok(None);
    }
    decode_workspace_edit(result).map(Some)
}

/// Decode a `WorkspaceEdit`
///
/// Empty `changes`/`documentChanges` are treated as absent. When both are
/// populated `documentChanges` is kept, so at most one side is ever present.
pub fn decode_workspace_edit(result: Value) -> DecodeResult<WorkspaceEdit> {
    let mut object = expect_object(result, "workspaceEdit")?;

    let document_changes = match object.remove("documentChanges") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let operations = expect_array(value, "documentChanges")?
                .into_iter()
                .map(decode_document_change)
                .collect::<DecodeResult<Vec<_>>>()?;
            (!operations.is_empty()).then(|| group_document_changes(operations))
        }
    };

    let changes = match object.remove("changes") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let map: HashMap<Uri, Vec<TextEdit>> = from_value(value, "changes")?;
            (!map.is_empty()).then_some(map)
        }
    };

    let changes = match (&document_changes, changes) {
        (Some(_), Some(dropped)) => {
            debug!(
                "workspaceEdit carries both shapes, keeping documentChanges and dropping {} changes entries",
                dropped.len()
            );
            None
        }
        (_, changes) => changes,
    };

    let change_annotations = match object.remove("changeAnnotations") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let map: HashMap<String, ChangeAnnotation> = from_value(value, "changeAnnotations")?;
            (!map.is_empty()).then_some(map)
        }
    };

    Ok(WorkspaceEdit {
        changes,
        document_changes,
        change_annotations,
    })
}

/// Plain edit lists stay [`DocumentChanges::Edits`]; any resource operation
/// makes the whole list [`DocumentChanges::Operations`]
fn group_document_changes(operations: Vec<DocumentChangeOperation>) -> DocumentChanges {
    if operations
        .iter()
        .all(|op| matches!(op, DocumentChangeOperation::Edit(_)))
    {
        DocumentChanges::Edits(
            operations
                .into_iter()
                .filter_map(|op| match op {
                    DocumentChangeOperation::Edit(edit) => Some(edit),
                    DocumentChangeOperation::Op(_) => None,
                })
                .collect(),
        )
    } else {
        DocumentChanges::Operations(operations)
    }
}

/// One `documentChanges` element, chosen by `kind` or by field presence
fn decode_document_change(value: Value) -> DecodeResult<DocumentChangeOperation> {
    let kind = value.get("kind").and_then(Value::as_str).map(str::to_string);

    let op = match kind.as_deref() {
        Some("create") => ResourceOp::Create(from_value::<CreateFile>(value, "create file")?),
        Some("rename") => ResourceOp::Rename(from_value::<RenameFile>(value, "rename file")?),
        Some("delete") => ResourceOp::Delete(from_value::<DeleteFile>(value, "delete file")?),
        Some(other) => return Err(DecodeError(format!("unknown resource operation '{other}'"))),
        None if value.get("textDocument").is_some() && value.get("edits").is_some() => {
            return decode_text_document_edit(value).map(DocumentChangeOperation::Edit);
        }
        None => {
            return Err(DecodeError(
                "document change is neither an edit nor a resource operation".to_string(),
            ));
        }
    };
    Ok(DocumentChangeOperation::Op(op))
}

/// Edits carrying an `annotationId` become [`AnnotatedTextEdit`]s. Left to
/// untagged serde they would match plain [`TextEdit`] and lose the id.
fn decode_text_document_edit(value: Value) -> DecodeResult<TextDocumentEdit> {
    let mut object = expect_object(value, "text document edit")?;

    let text_document = from_value::<OptionalVersionedTextDocumentIdentifier>(
        object.remove("textDocument").unwrap_or(Value::Null),
        "text document edit target",
    )?;

    let edits = expect_array(
        object.remove("edits").unwrap_or(Value::Null),
        "text document edits",
    )?
    .into_iter()
    .map(|edit| {
        if edit.get("annotationId").is_some() {
            from_value::<AnnotatedTextEdit>(edit, "annotated edit").map(OneOf::Right)
        } else {
            from_value::<TextEdit>(edit, "text edit").map(OneOf::Left)
        }
    })
    .collect::<DecodeResult<Vec<_>>>()?;

    Ok(TextDocumentEdit {
        text_document,
        edits,
    })
}

// ============================================================================
// clangd extensions
// ============================================================================

/// `string | null`; a URI that is not a local file is treated as no answer
pub fn decode_switch_source_header(result: Value) -> DecodeResult<Option<std::path::PathBuf>> {
    match result {
        Value::Null => Ok(None),
        Value::String(uri) => Ok(uri_to_path(&uri)),
        other => Err(DecodeError(format!(
            "switchSourceHeader: expected string, found {}",
            kind_of(&other)
        ))),
    }
}

// ============================================================================
// Notifications
// ============================================================================

pub fn decode_publish_diagnostics(params: Value) -> DecodeResult<PublishDiagnosticsParams> {
    from_value(params, "publishDiagnostics")
}

// ============================================================================
// Tests
// ============================================================================
