//! Semantic queries on a ready connection.
//!
//! Every query checks readiness before touching the wire and opens the target
//! document on demand. Paths may be absolute or relative to the repository
//! root.

use std::path::{Path, PathBuf};

use polyglot_types::{Location, Range, Symbol, SymbolKind, SymbolTreeNode, WorkspaceSymbol};
use serde_json::Value;
use tracing::Instrument;

use crate::connection::Connection;
use crate::documents::DocumentStore;
use crate::error::{QueryError, RequestError};
use crate::protocol;

const DEFINITION: &str = "textDocument/definition";
const REFERENCES: &str = "textDocument/references";
const DOCUMENT_SYMBOL: &str = "textDocument/documentSymbol";
const WORKSPACE_SYMBOL: &str = "workspace/symbol";

impl Connection {
    /// Where the symbol at `(line, character)` is defined.
    pub async fn definition(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, QueryError> {
        self.ensure_ready()?;
        let uri = self.ensure_open(path.as_ref()).await?.uri;
        let params = protocol::text_document_position_params(&uri, line, character);
        let result = self.query(DEFINITION, params).await?;
        protocol::parse_locations(result).map_err(|source| QueryError::Decode {
            method: DEFINITION,
            source,
        })
    }

    /// All references to the symbol at `(line, character)`.
    pub async fn references(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>, QueryError> {
        self.ensure_ready()?;
        let uri = self.ensure_open(path.as_ref()).await?.uri;
        let params = protocol::reference_params(&uri, line, character, include_declaration);
        let result = self.query(REFERENCES, params).await?;
        protocol::parse_locations(result).map_err(|source| QueryError::Decode {
            method: REFERENCES,
            source,
        })
    }

    /// The symbols declared in one document, as a forest.
    pub async fn document_symbols(&self, path: impl AsRef<Path>) -> Result<Vec<Symbol>, QueryError> {
        self.ensure_ready()?;
        let uri = self.ensure_open(path.as_ref()).await?.uri;
        self.symbols_for_uri(&uri).await
    }

    /// Symbols matching `query` anywhere in the workspace.
    pub async fn workspace_symbols(&self, query: &str) -> Result<Vec<WorkspaceSymbol>, QueryError> {
        self.ensure_ready()?;
        let result = self
            .query(WORKSPACE_SYMBOL, protocol::workspace_symbol_params(query))
            .await?;
        protocol::parse_workspace_symbols(result).map_err(|source| QueryError::Decode {
            method: WORKSPACE_SYMBOL,
            source,
        })
    }

    /// Directory → file → symbol tree for every source file under the root.
    ///
    /// Documents opened only for this walk are closed again afterwards. A
    /// file the server refuses to analyse shows up with no children.
    pub async fn full_symbol_tree(&self) -> Result<Vec<SymbolTreeNode>, QueryError> {
        self.ensure_ready()?;
        let files = self.source_files().await?;
        tracing::debug!(parent: self.span(), files = files.len(), "building symbol tree");

        let mut roots = Vec::new();
        for file in files {
            let opened = self.ensure_open(&file).await?;
            let symbols = match self.symbols_for_uri(&opened.uri).await {
                Ok(symbols) => symbols,
                Err(QueryError::Request(RequestError::Remote(e))) => {
                    tracing::warn!(parent: self.span(), file = %file.display(), "document symbols failed: {e}");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            if opened.newly_opened {
                self.close_document(&file).await?;
            }

            let relative = file.strip_prefix(self.root()).unwrap_or(&file);
            let mut dirs: Vec<String> = relative
                .parent()
                .into_iter()
                .flat_map(Path::components)
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            dirs.retain(|d| !d.is_empty());
            let file_node = SymbolTreeNode {
                name: relative
                    .file_name()
                    .map_or_else(|| relative.display().to_string(), |n| n.to_string_lossy().into_owned()),
                kind: SymbolKind::File,
                location: Some(Location::new(opened.uri.clone(), Range::default())),
                children: symbols
                    .iter()
                    .map(|symbol| SymbolTreeNode::from_symbol(&opened.uri, symbol))
                    .collect(),
            };
            insert_file(&mut roots, &dirs, file_node);
        }
        Ok(roots)
    }

    // ------------------------------------------------------------------
    // Document synchronisation
    // ------------------------------------------------------------------

    /// Send `didOpen` for `path` (read from disk) unless it is already open.
    /// Returns the document URI.
    pub async fn open_document(&self, path: impl AsRef<Path>) -> Result<String, QueryError> {
        self.ensure_ready()?;
        Ok(self.ensure_open(path.as_ref()).await?.uri)
    }

    /// Replace the server's view of `path` with `text`.
    ///
    /// Opens the document with `text` if it is not open yet.
    pub async fn change_document(&self, path: impl AsRef<Path>, text: &str) -> Result<(), QueryError> {
        self.ensure_ready()?;
        let (_, uri) = self.document_uri(path.as_ref())?;
        let mut docs = self.documents().lock().await;
        match docs.next_version(&uri) {
            Some(version) => {
                let params = protocol::did_change_params(&uri, version, text);
                self.rpc()
                    .send_notification("textDocument/didChange", Some(params))
                    .await?;
                docs.record_change(&uri, version);
            }
            None => self.send_did_open(&mut docs, &uri, text).await?,
        }
        Ok(())
    }

    /// Send `didClose` for `path` if it is open. Returns whether it was.
    pub async fn close_document(&self, path: impl AsRef<Path>) -> Result<bool, QueryError> {
        self.ensure_ready()?;
        let (_, uri) = self.document_uri(path.as_ref())?;
        let mut docs = self.documents().lock().await;
        if !docs.is_open(&uri) {
            return Ok(false);
        }
        self.rpc()
            .send_notification("textDocument/didClose", Some(protocol::did_close_params(&uri)))
            .await?;
        docs.close(&uri);
        Ok(true)
    }

    /// URIs of the documents currently open on the server.
    pub async fn open_documents(&self) -> Vec<String> {
        self.documents().lock().await.open_uris()
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }

    fn document_uri(&self, path: &Path) -> Result<(PathBuf, String), QueryError> {
        let path = self.resolve_path(path);
        let uri = protocol::path_to_file_uri(&path)?.to_string();
        Ok((path, uri))
    }

    async fn ensure_open(&self, path: &Path) -> Result<OpenedDocument, QueryError> {
        let (path, uri) = self.document_uri(path)?;
        let mut docs = self.documents().lock().await;
        if docs.is_open(&uri) {
            return Ok(OpenedDocument {
                uri,
                newly_opened: false,
            });
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| QueryError::Io { path, source })?;
        self.send_did_open(&mut docs, &uri, &text).await?;
        Ok(OpenedDocument {
            uri,
            newly_opened: true,
        })
    }

    async fn send_did_open(
        &self,
        docs: &mut DocumentStore,
        uri: &str,
        text: &str,
    ) -> Result<(), QueryError> {
        let params = protocol::did_open_params(
            uri,
            self.adapter().language_id(),
            DocumentStore::INITIAL_VERSION,
            text,
        );
        self.rpc()
            .send_notification("textDocument/didOpen", Some(params))
            .await?;
        docs.mark_open(uri);
        Ok(())
    }

    async fn symbols_for_uri(&self, uri: &str) -> Result<Vec<Symbol>, QueryError> {
        let result = self
            .query(DOCUMENT_SYMBOL, protocol::document_symbol_params(uri))
            .await?;
        protocol::parse_document_symbols(result).map_err(|source| QueryError::Decode {
            method: DOCUMENT_SYMBOL,
            source,
        })
    }

    async fn query(&self, method: &str, params: Value) -> Result<Value, QueryError> {
        Ok(self
            .rpc()
            .send_request(method, Some(params), self.request_timeout())
            .instrument(self.span().clone())
            .await?)
    }

    /// Source files under the root, sorted, skipping ignored directories.
    async fn source_files(&self) -> Result<Vec<PathBuf>, QueryError> {
        let adapter = std::sync::Arc::clone(self.adapter());
        let root = self.root().to_path_buf();
        let walk_root = root.clone();
        tokio::task::spawn_blocking(move || {
            let filter_adapter = std::sync::Arc::clone(&adapter);
            let walker = ignore::WalkBuilder::new(&walk_root)
                .standard_filters(false)
                .sort_by_file_name(|a, b| a.cmp(b))
                .filter_entry(move |entry| {
                    let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                    entry.depth() == 0
                        || !is_dir
                        || !filter_adapter.is_ignored_dirname(&entry.file_name().to_string_lossy())
                })
                .build();

            let mut files = Vec::new();
            for entry in walker {
                match entry {
                    Ok(entry) => {
                        let is_file = entry.file_type().is_some_and(|t| t.is_file());
                        if is_file && adapter.is_source_file(entry.path()) {
                            files.push(entry.into_path());
                        }
                    }
                    Err(e) => tracing::debug!("skipping unreadable entry: {e}"),
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| QueryError::Io {
            path: root,
            source: std::io::Error::other(e),
        })
    }
}

struct OpenedDocument {
    uri: String,
    newly_opened: bool,
}

/// Insert `file` below the directory chain `dirs`, creating package nodes as
/// needed. Inputs arrive sorted, so appending keeps the tree sorted.
fn insert_file(nodes: &mut Vec<SymbolTreeNode>, dirs: &[String], file: SymbolTreeNode) {
    let Some((first, rest)) = dirs.split_first() else {
        nodes.push(file);
        return;
    };
    let index = match nodes
        .iter()
        .position(|n| n.kind == SymbolKind::Package && n.name == *first)
    {
        Some(index) => index,
        None => {
            nodes.push(SymbolTreeNode {
                name: first.clone(),
                kind: SymbolKind::Package,
                location: None,
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };
    insert_file(&mut nodes[index].children, rest, file);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> SymbolTreeNode {
        SymbolTreeNode {
            name: name.to_string(),
            kind: SymbolKind::File,
            location: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_insert_file_builds_nested_packages() {
        let mut roots = Vec::new();
        insert_file(&mut roots, &[], file("Main.qml"));
        insert_file(&mut roots, &["components".into()], file("Button.qml"));
        insert_file(&mut roots, &["components".into()], file("Label.qml"));
        insert_file(
            &mut roots,
            &["components".into(), "inner".into()],
            file("Deep.qml"),
        );

        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].name, "Main.qml");
        let components = &roots[1];
        assert_eq!(components.kind, SymbolKind::Package);
        let names: Vec<_> = components.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["Button.qml", "Label.qml", "inner"]);
        assert_eq!(components.children[2].children[0].name, "Deep.qml");
        assert_eq!(components.count(), 5);
    }
}
