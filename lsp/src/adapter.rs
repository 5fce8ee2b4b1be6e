//! The seam between the generic client and a concrete language server.

use std::ffi::OsStr;
use std::path::Path;

use polyglot_types::LaunchSpec;
use serde_json::Value;

use crate::dispatch::HandlerTable;
use crate::process::StartupError;
use crate::protocol;

/// Everything the client needs to know about one kind of language server.
///
/// Adapters are shared as `Arc<dyn LanguageAdapter>`; `launch_spec` runs on
/// the blocking pool, so it may probe the system synchronously.
pub trait LanguageAdapter: Send + Sync {
    /// Short name used in logs (`qml`, `rust`, ...).
    fn name(&self) -> &str;

    /// The `languageId` sent with `textDocument/didOpen`.
    fn language_id(&self) -> &str;

    /// File extensions (without the dot) this server understands.
    fn source_extensions(&self) -> &[String];

    /// How to start the server for the repository at `root`.
    ///
    /// Missing runtime dependencies are reported as
    /// [`StartupError::MissingDependency`].
    fn launch_spec(&self, root: &Path) -> Result<LaunchSpec, StartupError>;

    /// Params for the `initialize` request.
    fn initialize_params(&self, root: &Path) -> Result<Value, StartupError> {
        protocol::initialize_params(root).map_err(|e| StartupError::InvalidRoot {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Handlers layered over the defaults before `initialize` is sent.
    fn extra_handlers(&self) -> HandlerTable {
        HandlerTable::new()
    }

    /// Directories skipped when walking the repository.
    fn is_ignored_dirname(&self, name: &str) -> bool {
        name.starts_with('.')
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension().and_then(OsStr::to_str).is_some_and(|ext| {
            self.source_extensions()
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal {
        extensions: Vec<String>,
    }

    impl LanguageAdapter for Minimal {
        fn name(&self) -> &str {
            "minimal"
        }

        fn language_id(&self) -> &str {
            "minimal"
        }

        fn source_extensions(&self) -> &[String] {
            &self.extensions
        }

        fn launch_spec(&self, root: &Path) -> Result<LaunchSpec, StartupError> {
            Ok(LaunchSpec::new("minimal-ls", root))
        }
    }

    fn adapter() -> Minimal {
        Minimal {
            extensions: vec!["qml".into(), "js".into()],
        }
    }

    #[test]
    fn test_default_source_file_matching() {
        let adapter = adapter();
        assert!(adapter.is_source_file(Path::new("src/Main.qml")));
        assert!(adapter.is_source_file(Path::new("Main.QML")));
        assert!(!adapter.is_source_file(Path::new("Main.qmlc")));
        assert!(!adapter.is_source_file(Path::new("Makefile")));
    }

    #[test]
    fn test_default_ignores_hidden_directories() {
        let adapter = adapter();
        assert!(adapter.is_ignored_dirname(".git"));
        assert!(!adapter.is_ignored_dirname("src"));
        assert!(!adapter.extra_handlers().has_request("anything"));
    }

    #[test]
    fn test_default_initialize_params_reject_relative_root() {
        let err = adapter()
            .initialize_params(Path::new("relative"))
            .unwrap_err();
        assert!(matches!(err, StartupError::InvalidRoot { .. }));
    }
}
