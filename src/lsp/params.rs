//! Request and notification parameter builders
//!
//! All builders take typed inputs and produce the lsp-types structs the
//! session serializes. Paths must be absolute; anything else cannot become
//! a `file:` URI.

use crate::lsp::error::LspError;
use lsp_types::{
    ChangeAnnotationWorkspaceEditClientCapabilities, ClientCapabilities, ClientInfo,
    CompletionClientCapabilities, CompletionItemCapability, CompletionItemTag, CompletionParams,
    DiagnosticTag, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentFormattingParams, DocumentRangeFormattingParams,
    DocumentSymbolClientCapabilities, DocumentSymbolParams, DynamicRegistrationClientCapabilities,
    FormattingOptions, GotoCapability, HoverClientCapabilities, InitializeParams, MarkupKind,
    ParameterInformationSettings, PartialResultParams, Position, PublishDiagnosticsClientCapabilities,
    Range, ReferenceContext, ReferenceParams, RenameClientCapabilities, RenameParams,
    ResourceOperationKind, SemanticTokensClientCapabilities,
    SemanticTokensClientCapabilitiesRequests, SemanticTokensFullOptions, SemanticTokensParams,
    SignatureHelpClientCapabilities, SignatureInformationSettings, TagSupport,
    TextDocumentClientCapabilities, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentPositionParams, TextDocumentSyncClientCapabilities, TokenFormat,
    Uri, VersionedTextDocumentIdentifier, WindowClientCapabilities, WorkDoneProgressParams,
    WorkspaceClientCapabilities, WorkspaceEditClientCapabilities, WorkspaceFolder,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Convert an absolute path to a `file:` URI
pub fn path_to_uri(path: &Path) -> Result<Uri, LspError> {
    let url = Url::from_file_path(path).map_err(|()| LspError::InvalidPath(path.to_path_buf()))?;
    Uri::from_str(url.as_str()).map_err(|_| LspError::InvalidPath(path.to_path_buf()))
}

/// Convert a `file:` URI back to a local path
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    Url::parse(uri).ok()?.to_file_path().ok()
}

/// LSP language identifier guessed from the file extension
pub fn language_id_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("c") => "c",
        Some("h" | "hh" | "hpp" | "hxx" | "cc" | "cpp" | "cxx" | "c++" | "ipp" | "inl") => "cpp",
        Some("py" | "pyi") => "python",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("java") => "java",
        _ => "plaintext",
    }
}

pub fn text_document(path: &Path) -> Result<TextDocumentIdentifier, LspError> {
    Ok(TextDocumentIdentifier::new(path_to_uri(path)?))
}

pub fn text_document_position(
    path: &Path,
    position: Position,
) -> Result<TextDocumentPositionParams, LspError> {
    Ok(TextDocumentPositionParams::new(text_document(path)?, position))
}

pub fn did_open(
    path: &Path,
    language_id: &str,
    version: i32,
    text: &str,
) -> Result<DidOpenTextDocumentParams, LspError> {
    Ok(DidOpenTextDocumentParams {
        text_document: TextDocumentItem::new(
            path_to_uri(path)?,
            language_id.to_string(),
            version,
            text.to_string(),
        ),
    })
}

/// Full-document replacement
pub fn full_change(text: impl Into<String>) -> TextDocumentContentChangeEvent {
    TextDocumentContentChangeEvent {
        range: None,
        range_length: None,
        text: text.into(),
    }
}

pub fn ranged_change(range: Range, text: impl Into<String>) -> TextDocumentContentChangeEvent {
    TextDocumentContentChangeEvent {
        range: Some(range),
        range_length: None,
        text: text.into(),
    }
}

pub fn did_change(
    path: &Path,
    version: i32,
    changes: &[TextDocumentContentChangeEvent],
) -> Result<DidChangeTextDocumentParams, LspError> {
    Ok(DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier::new(path_to_uri(path)?, version),
        content_changes: changes.to_vec(),
    })
}

pub fn did_close(path: &Path) -> Result<DidCloseTextDocumentParams, LspError> {
    Ok(DidCloseTextDocumentParams {
        text_document: text_document(path)?,
    })
}

pub fn completion(path: &Path, position: Position) -> Result<CompletionParams, LspError> {
    Ok(CompletionParams {
        text_document_position: text_document_position(path, position)?,
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: None,
    })
}

pub fn references(
    path: &Path,
    position: Position,
    include_declaration: bool,
) -> Result<ReferenceParams, LspError> {
    Ok(ReferenceParams {
        text_document_position: text_document_position(path, position)?,
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: ReferenceContext {
            include_declaration,
        },
    })
}

pub fn rename(path: &Path, position: Position, new_name: &str) -> Result<RenameParams, LspError> {
    Ok(RenameParams {
        text_document_position: text_document_position(path, position)?,
        new_name: new_name.to_string(),
        work_done_progress_params: WorkDoneProgressParams::default(),
    })
}

pub fn document_symbol(path: &Path) -> Result<DocumentSymbolParams, LspError> {
    Ok(DocumentSymbolParams {
        text_document: text_document(path)?,
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    })
}

pub fn semantic_tokens(path: &Path) -> Result<SemanticTokensParams, LspError> {
    Ok(SemanticTokensParams {
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        text_document: text_document(path)?,
    })
}

/// Four spaces, no tabs
pub fn default_formatting_options() -> FormattingOptions {
    FormattingOptions {
        tab_size: 4,
        insert_spaces: true,
        ..Default::default()
    }
}

pub fn formatting(
    path: &Path,
    options: FormattingOptions,
) -> Result<DocumentFormattingParams, LspError> {
    Ok(DocumentFormattingParams {
        text_document: text_document(path)?,
        options,
        work_done_progress_params: WorkDoneProgressParams::default(),
    })
}

pub fn range_formatting(
    path: &Path,
    range: Range,
    options: FormattingOptions,
) -> Result<DocumentRangeFormattingParams, LspError> {
    Ok(DocumentRangeFormattingParams {
        text_document: text_document(path)?,
        range,
        options,
        work_done_progress_params: WorkDoneProgressParams::default(),
    })
}

/// Everything that goes into an `initialize` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeRequest {
    pub root: PathBuf,
    pub compile_commands_dir: Option<PathBuf>,
    pub client_name: String,
    pub client_version: String,
    pub process_id: u32,
}

impl InitializeRequest {
    pub fn to_params(&self) -> Result<InitializeParams, LspError> {
        let root_uri = path_to_uri(&self.root)?;
        let folder_name = self
            .root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string());

        let initialization_options = self.compile_commands_dir.as_ref().map(|dir| {
            json!({
                "compilationDatabasePath": dir.display().to_string(),
            })
        });

        Ok(InitializeParams {
            process_id: Some(self.process_id),
            #[allow(deprecated)]
            root_path: Some(self.root.display().to_string()),
            #[allow(deprecated)]
            root_uri: Some(root_uri.clone()),
            initialization_options,
            capabilities: client_capabilities(),
            trace: None,
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: folder_name,
            }]),
            client_info: Some(ClientInfo {
                name: self.client_name.clone(),
                version: Some(self.client_version.clone()),
            }),
            locale: None,
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
    }
}

fn static_registration() -> Option<DynamicRegistrationClientCapabilities> {
    Some(DynamicRegistrationClientCapabilities {
        dynamic_registration: Some(false),
    })
}

/// Capabilities this client announces
///
/// `workspace/applyEdit` is answered with MethodNotFound, so it is not
/// advertised.
fn client_capabilities() -> ClientCapabilities {
    let markup = Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]);

    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            apply_edit: Some(false),
            workspace_edit: Some(WorkspaceEditClientCapabilities {
                document_changes: Some(true),
                resource_operations: Some(vec![
                    ResourceOperationKind::Create,
                    ResourceOperationKind::Rename,
                    ResourceOperationKind::Delete,
                ]),
                change_annotation_support: Some(ChangeAnnotationWorkspaceEditClientCapabilities {
                    groups_on_label: Some(true),
                }),
                ..Default::default()
            }),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                did_save: Some(false),
                will_save: Some(false),
                ..Default::default()
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            references: static_registration(),
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: markup.clone(),
            }),
            completion: Some(CompletionClientCapabilities {
                completion_item: Some(CompletionItemCapability {
                    snippet_support: Some(true),
                    documentation_format: markup.clone(),
                    deprecated_support: Some(true),
                    tag_support: Some(TagSupport {
                        value_set: vec![CompletionItemTag::DEPRECATED],
                    }),
                    insert_replace_support: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            signature_help: Some(SignatureHelpClientCapabilities {
                signature_information: Some(SignatureInformationSettings {
                    documentation_format: markup,
                    parameter_information: Some(ParameterInformationSettings {
                        label_offset_support: Some(true),
                    }),
                    active_parameter_support: None,
                }),
                ..Default::default()
            }),
            document_highlight: static_registration(),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                dynamic_registration: Some(false),
                symbol_kind: None,
                hierarchical_document_symbol_support: Some(true),
                tag_support: None,
            }),
            formatting: static_registration(),
            range_formatting: static_registration(),
            rename: Some(RenameClientCapabilities {
                prepare_support: Some(false),
                ..Default::default()
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                version_support: Some(true),
                tag_support: Some(TagSupport {
                    value_set: vec![DiagnosticTag::UNNECESSARY, DiagnosticTag::DEPRECATED],
                }),
                code_description_support: Some(true),
                data_support: None,
            }),
            semantic_tokens: Some(SemanticTokensClientCapabilities {
                dynamic_registration: None,
                requests: SemanticTokensClientCapabilitiesRequests {
                    range: Some(false),
                    full: Some(SemanticTokensFullOptions::Delta { delta: Some(false) }),
                },
                token_types: Vec::new(),
                token_modifiers: Vec::new(),
                formats: vec![TokenFormat::RELATIVE],
                overlapping_token_support: None,
                multiline_token_support: None,
                server_cancel_support: None,
                augments_syntax_tokens: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
