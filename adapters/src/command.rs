//! Servers described entirely by configuration (`[servers.<name>]`).

use std::collections::BTreeMap;
use std::path::Path;

use polyglot_lsp::{LanguageAdapter, StartupError};
use polyglot_types::LaunchSpec;
use serde::{Deserialize, Serialize};

/// Configuration for a single command-launched language server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandServerConfig {
    /// Executable command (e.g. "rust-analyzer").
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// LSP language identifier sent with `didOpen`.
    pub language_id: String,
    /// File extensions this server handles (e.g. `["rs"]`).
    #[serde(default)]
    pub file_extensions: Vec<String>,
    /// Directory names skipped in addition to hidden ones.
    #[serde(default)]
    pub ignored_dirs: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CommandAdapter {
    name: String,
    config: CommandServerConfig,
}

impl CommandAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CommandServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CommandServerConfig {
        &self.config
    }
}

impl LanguageAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn language_id(&self) -> &str {
        &self.config.language_id
    }

    fn source_extensions(&self) -> &[String] {
        &self.config.file_extensions
    }

    fn launch_spec(&self, root: &Path) -> Result<LaunchSpec, StartupError> {
        if self.config.command.trim().is_empty() {
            return Err(StartupError::Adapter(format!(
                "server '{}' has an empty command",
                self.name
            )));
        }
        let spec = self
            .config
            .env
            .iter()
            .fold(
                LaunchSpec::new(&self.config.command, root).args(&self.config.args),
                |spec, (key, value)| spec.env(key, value),
            );
        Ok(spec)
    }

    fn is_ignored_dirname(&self, name: &str) -> bool {
        name.starts_with('.') || self.config.ignored_dirs.iter().any(|d| d == name)
    }
}
