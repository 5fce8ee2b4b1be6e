//! LSP payloads: parameter builders for outgoing messages and decoders for
//! the results the query facade understands.

use std::path::{Path, PathBuf};

use polyglot_types::{Location, Position, Range, Symbol, SymbolKind, WorkspaceSymbol};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

// ============================================================================
// Outgoing params
// ============================================================================

/// Generic `initialize` params for servers without special needs.
///
/// # Errors
/// Fails when `root` cannot be expressed as a file URI.
pub fn initialize_params(root: &Path) -> Result<Value, PathToUriError> {
    let root_uri = path_to_file_uri(root)?;
    Ok(json!({
        "processId": std::process::id(),
        "rootPath": root.display().to_string(),
        "rootUri": root_uri.as_str(),
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "definition": { "linkSupport": true },
                "references": {},
                "documentSymbol": {
                    "hierarchicalDocumentSymbolSupport": true,
                    "symbolKind": { "valueSet": (1..=26).collect::<Vec<u32>>() }
                }
            },
            "workspace": {
                "workspaceFolders": true,
                "symbol": {}
            }
        },
        "workspaceFolders": [workspace_folder(root, root_uri.as_str())]
    }))
}

/// A `WorkspaceFolder` object named after the root directory.
#[must_use]
pub fn workspace_folder(root: &Path, root_uri: &str) -> Value {
    let name = root
        .file_name()
        .map_or_else(|| "workspace".to_string(), |n| n.to_string_lossy().into_owned());
    json!({ "uri": root_uri, "name": name })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> Value {
    json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn text_document_position_params(uri: &str, line: u32, character: u32) -> Value {
    json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn reference_params(
    uri: &str,
    line: u32,
    character: u32,
    include_declaration: bool,
) -> Value {
    let mut params = text_document_position_params(uri, line, character);
    params["context"] = json!({ "includeDeclaration": include_declaration });
    params
}

pub(crate) fn document_symbol_params(uri: &str) -> Value {
    json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn workspace_symbol_params(query: &str) -> Value {
    json!({ "query": query })
}

pub(crate) fn cancel_params(id: &crate::message::RequestId) -> Value {
    json!({ "id": id })
}

// ============================================================================
// Incoming results
// ============================================================================

#[derive(Debug, Deserialize)]
struct LspPosition {
    line: u32,
    character: u32,
}

#[derive(Debug, Deserialize)]
struct LspRange {
    start: LspPosition,
    end: LspPosition,
}

impl From<LspRange> for Range {
    fn from(range: LspRange) -> Self {
        Range::new(
            Position::new(range.start.line, range.start.character),
            Position::new(range.end.line, range.end.character),
        )
    }
}

#[derive(Debug, Deserialize)]
struct LspLocation {
    uri: String,
    range: LspRange,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LspLocationLink {
    target_uri: String,
    target_selection_range: LspRange,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnyLocation {
    Location(LspLocation),
    Link(LspLocationLink),
}

impl From<AnyLocation> for Location {
    fn from(loc: AnyLocation) -> Self {
        match loc {
            AnyLocation::Location(l) => Location::new(l.uri, l.range.into()),
            AnyLocation::Link(l) => Location::new(l.target_uri, l.target_selection_range.into()),
        }
    }
}

/// Decode a definition/references result: `null`, a `Location`, or an array
/// of `Location`/`LocationLink`.
pub(crate) fn parse_locations(value: Value) -> Result<Vec<Location>, serde_json::Error> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value::<AnyLocation>(item).map(Location::from))
            .collect(),
        single => Ok(vec![serde_json::from_value::<AnyLocation>(single)?.into()]),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LspDocumentSymbol {
    name: String,
    kind: u32,
    #[serde(default)]
    detail: Option<String>,
    range: LspRange,
    selection_range: LspRange,
    #[serde(default)]
    children: Vec<LspDocumentSymbol>,
}

impl From<LspDocumentSymbol> for Symbol {
    fn from(sym: LspDocumentSymbol) -> Self {
        Symbol {
            name: sym.name,
            kind: SymbolKind::from_lsp(sym.kind),
            detail: sym.detail.filter(|d| !d.is_empty()),
            range: sym.range.into(),
            selection_range: sym.selection_range.into(),
            children: sym.children.into_iter().map(Symbol::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LspSymbolInformation {
    name: String,
    kind: u32,
    location: LspLocation,
    #[serde(default)]
    container_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnyDocumentSymbol {
    // `location` is only present on the flat form, so try it first.
    Information(LspSymbolInformation),
    Document(LspDocumentSymbol),
}

/// Decode a `textDocument/documentSymbol` result, hierarchical or flat.
pub(crate) fn parse_document_symbols(value: Value) -> Result<Vec<Symbol>, serde_json::Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items: Vec<AnyDocumentSymbol> = serde_json::from_value(value)?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            AnyDocumentSymbol::Document(sym) => sym.into(),
            AnyDocumentSymbol::Information(info) => {
                let range = Range::from(info.location.range);
                Symbol {
                    name: info.name,
                    kind: SymbolKind::from_lsp(info.kind),
                    detail: info.container_name,
                    range,
                    selection_range: range,
                    children: Vec::new(),
                }
            }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct LspWorkspaceLocation {
    uri: String,
    #[serde(default)]
    range: Option<LspRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LspWorkspaceSymbol {
    name: String,
    kind: u32,
    location: LspWorkspaceLocation,
    #[serde(default)]
    container_name: Option<String>,
}

/// Decode a `workspace/symbol` result. `WorkspaceSymbol` locations may omit
/// the range; those map to the start of the document.
pub(crate) fn parse_workspace_symbols(
    value: Value,
) -> Result<Vec<WorkspaceSymbol>, serde_json::Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items: Vec<LspWorkspaceSymbol> = serde_json::from_value(value)?;
    Ok(items
        .into_iter()
        .map(|sym| WorkspaceSymbol {
            name: sym.name,
            kind: SymbolKind::from_lsp(sym.kind),
            container_name: sym.container_name.filter(|c| !c.is_empty()),
            location: Location::new(
                sym.location.uri,
                sym.location.range.map(Range::from).unwrap_or_default(),
            ),
        })
        .collect())
}
