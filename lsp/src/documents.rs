//! Open-document bookkeeping for one connection.

use std::collections::HashMap;

/// Tracks which documents the server has been told about and the version
/// each one is at. Versions start at 1 and only grow.
#[derive(Debug, Default)]
pub(crate) struct DocumentStore {
    versions: HashMap<String, i32>,
}

impl DocumentStore {
    pub const INITIAL_VERSION: i32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, uri: &str) -> bool {
        self.versions.contains_key(uri)
    }

    pub fn version(&self, uri: &str) -> Option<i32> {
        self.versions.get(uri).copied()
    }

    /// Record a successful `didOpen`.
    pub fn mark_open(&mut self, uri: &str) {
        self.versions
            .insert(uri.to_string(), Self::INITIAL_VERSION);
    }

    /// The version the next `didChange` for `uri` must carry.
    pub fn next_version(&self, uri: &str) -> Option<i32> {
        self.version(uri).map(|v| v.saturating_add(1))
    }

    /// Record a successful `didChange`.
    pub fn record_change(&mut self, uri: &str, version: i32) {
        if let Some(current) = self.versions.get_mut(uri) {
            *current = (*current).max(version);
        }
    }

    /// Forget `uri`. Returns whether it was open.
    pub fn close(&mut self, uri: &str) -> bool {
        self.versions.remove(uri).is_some()
    }

    pub fn open_uris(&self) -> Vec<String> {
        let mut uris: Vec<_> = self.versions.keys().cloned().collect();
        uris.sort();
        uris
    }
}
