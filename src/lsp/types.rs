//! Typed result model
//!
//! Results reuse the lsp-types structs. What lsp-types does not model is
//! kept here: clangd's completion `score`, semantic tokens resolved to
//! absolute positions, and the cached outcome of `initialize`.
//!
//! Shapes that LSP leaves ambiguous (definition, symbols) are discriminated
//! explicitly in [`crate::lsp::decode`] rather than through untagged serde.

use crate::lsp::params::uri_to_path;
use lsp_types::{
    CompletionItem, DocumentHighlight, DocumentSymbolResponse, GotoDefinitionResponse, Hover,
    Location, OneOf, Position, Range, SemanticTokens, SemanticTokensFullOptions,
    SemanticTokensLegend, SemanticTokensServerCapabilities, ServerCapabilities, ServerInfo,
    SignatureHelp, TextEdit, WorkspaceEdit,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Local file path of a location, when its URI is a `file:` URI
pub fn location_path(location: &Location) -> Option<PathBuf> {
    uri_to_path(location.uri.as_str())
}

// ============================================================================
// Completion
// ============================================================================

/// A completion item plus clangd's ranking score
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RankedCompletionItem {
    #[serde(flatten)]
    pub item: CompletionItem,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Result of `textDocument/completion`; a bare array becomes a complete list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completions {
    #[serde(default)]
    pub is_incomplete: bool,
    pub items: Vec<RankedCompletionItem>,
}

// ============================================================================
// Semantic tokens
// ============================================================================

/// A token resolved against the legend, with absolute coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsoluteToken {
    pub line: u32,
    pub start: u32,
    pub length: u32,
    pub token_type: Option<String>,
    pub modifiers: Vec<String>,
}

/// Undo the delta encoding and name each token's type and modifiers
pub fn resolve_tokens(tokens: &SemanticTokens, legend: &SemanticTokensLegend) -> Vec<AbsoluteToken> {
    let mut line = 0u32;
    let mut start = 0u32;

    tokens
        .data
        .iter()
        .map(|token| {
            if token.delta_line == 0 {
                start = start.saturating_add(token.delta_start);
            } else {
                line = line.saturating_add(token.delta_line);
                start = token.delta_start;
            }

            let modifiers = legend
                .token_modifiers
                .iter()
                .enumerate()
                .filter(|(bit, _)| *bit < 32 && token.token_modifiers_bitset & (1 << bit) != 0)
                .map(|(_, name)| name.as_str().to_string())
                .collect();

            AbsoluteToken {
                line,
                start,
                length: token.length,
                token_type: legend
                    .token_types
                    .get(token.token_type as usize)
                    .map(|name| name.as_str().to_string()),
                modifiers,
            }
        })
        .collect()
}

/// What the backend advertised for semantic tokens
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SemanticTokensCapability {
    pub legend: SemanticTokensLegend,
    pub full: bool,
    pub full_delta: bool,
    pub range: bool,
}

impl SemanticTokensCapability {
    pub fn from_server(capabilities: &ServerCapabilities) -> Option<Self> {
        let options = match capabilities.semantic_tokens_provider.as_ref()? {
            SemanticTokensServerCapabilities::SemanticTokensOptions(options) => options,
            SemanticTokensServerCapabilities::SemanticTokensRegistrationOptions(registration) => {
                &registration.semantic_tokens_options
            }
        };

        let (full, full_delta) = match &options.full {
            None | Some(SemanticTokensFullOptions::Bool(false)) => (false, false),
            Some(SemanticTokensFullOptions::Bool(true)) => (true, false),
            Some(SemanticTokensFullOptions::Delta { delta }) => (true, delta.unwrap_or(false)),
        };

        Some(Self {
            legend: options.legend.clone(),
            full,
            full_delta,
            range: options.range.unwrap_or(false),
        })
    }
}

// ============================================================================
// Initialize
// ============================================================================

/// Capability negotiation result, cached for the life of a session
#[derive(Debug, Clone, PartialEq)]
pub struct InitializeOutcome {
    /// The whole `initialize` result as sent
    pub raw: Value,
    pub capabilities: ServerCapabilities,
    pub server_info: Option<ServerInfo>,
    pub semantic_tokens: Option<SemanticTokensCapability>,
}

/// Whether a `bool | Options` provider is advertised and not `false`
pub fn advertised<T>(provider: &Option<OneOf<bool, T>>) -> bool {
    matches!(provider, Some(OneOf::Left(true) | OneOf::Right(_)))
}

// ============================================================================
// Decoded result union
// ============================================================================

/// Every result shape a session can deliver
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResult {
    Initialize(InitializeOutcome),
    /// `None` for `null` or an empty array
    Definition(Option<GotoDefinitionResponse>),
    References(Vec<Location>),
    Completion(Completions),
    SignatureHelp(Option<SignatureHelp>),
    Hover(Option<Hover>),
    DocumentHighlights(Vec<DocumentHighlight>),
    DocumentSymbols(DocumentSymbolResponse),
    SemanticTokens(Option<SemanticTokens>),
    Rename(Option<WorkspaceEdit>),
    Formatting(Vec<TextEdit>),
    SwitchHeaderSource(Option<PathBuf>),
    Shutdown,
    /// Undecoded payload: raw decode mode or a method without a decoder
    Raw(Value),
}

pub fn position(line: u32, character: u32) -> Position {
    Position::new(line, character)
}

pub fn range(start: (u32, u32), end: (u32, u32)) -> Range {
    Range::new(position(start.0, start.1), position(end.0, end.1))
}
