//! Qt's `qmlls` language server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use polyglot_lsp::protocol::{self, path_to_file_uri};
use polyglot_lsp::{LanguageAdapter, ProbeOutcome, StartupError, probe_binary};
use polyglot_types::LaunchSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const QMLLS: &str = "qmlls";

/// Upper bound for `qmlls --help` during the dependency probe.
pub const QML_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const INSTALL_HINT: &str = "qmlls is part of the Qt framework. Install Qt 6.x and make sure qmlls \
is on your PATH; it usually lives in <Qt install dir>/<version>/<platform>/bin/qmlls.";

const IGNORED_DIRS: &[&str] = &["build", "node_modules"];

/// `[languages.qml]` settings, translated into `qmlls` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QmlSettings {
    /// Build directory with compiled type information (`--build-dir`).
    pub build_dir: Option<PathBuf>,
    /// Extra import paths, one `-I` each.
    pub import_paths: Vec<PathBuf>,
    /// Let qmlls read `QML_IMPORT_PATH` (`-E`).
    pub use_environment_import_paths: bool,
    /// Disable automatic CMake rebuilds (`--no-cmake-calls`).
    pub no_cmake_calls: bool,
    /// Qt documentation directory for hover text (`-d`).
    pub doc_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct QmlAdapter {
    settings: QmlSettings,
    extensions: Vec<String>,
}

impl QmlAdapter {
    #[must_use]
    pub fn new(settings: QmlSettings) -> Self {
        Self {
            settings,
            extensions: vec!["qml".to_string()],
        }
    }

    #[must_use]
    pub fn settings(&self) -> &QmlSettings {
        &self.settings
    }

    /// The `qmlls` invocation for `root`, without probing for the binary.
    ///
    /// Relative paths in the settings are resolved against `root`.
    #[must_use]
    pub fn command_line(&self, root: &Path) -> LaunchSpec {
        let settings = &self.settings;
        let mut spec = LaunchSpec::new(QMLLS, root);
        if let Some(build_dir) = &settings.build_dir {
            spec = spec.arg("--build-dir").arg(join_root(root, build_dir));
        }
        for import_path in &settings.import_paths {
            spec = spec.arg("-I").arg(join_root(root, import_path));
        }
        if settings.use_environment_import_paths {
            spec = spec.arg("-E");
        }
        if settings.no_cmake_calls {
            spec = spec.arg("--no-cmake-calls");
        }
        if let Some(doc_dir) = &settings.doc_dir {
            spec = spec.arg("-d").arg(join_root(root, doc_dir));
        }
        spec
    }
}

impl Default for QmlAdapter {
    fn default() -> Self {
        Self::new(QmlSettings::default())
    }
}

fn join_root(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl LanguageAdapter for QmlAdapter {
    fn name(&self) -> &str {
        "qml"
    }

    fn language_id(&self) -> &str {
        "qml"
    }

    fn source_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn launch_spec(&self, root: &Path) -> Result<LaunchSpec, StartupError> {
        match probe_binary(QMLLS, &["--help"], QML_PROBE_TIMEOUT) {
            ProbeOutcome::Found { path, version } => {
                tracing::debug!(path = %path.display(), %version, "found qmlls");
            }
            ProbeOutcome::NotFound => {
                return Err(StartupError::MissingDependency {
                    dependency: QMLLS.to_string(),
                    hint: INSTALL_HINT.to_string(),
                });
            }
        }
        let spec = self.command_line(root);
        tracing::info!(command = %spec.display_command(), "launching qmlls");
        Ok(spec)
    }

    fn initialize_params(&self, root: &Path) -> Result<Value, StartupError> {
        let root_uri = path_to_file_uri(root).map_err(|e| StartupError::InvalidRoot {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(json!({
            "locale": "en",
            "capabilities": {
                "textDocument": {
                    "synchronization": { "didSave": true, "dynamicRegistration": true },
                    "definition": { "dynamicRegistration": true },
                    "documentSymbol": {
                        "dynamicRegistration": true,
                        "hierarchicalDocumentSymbolSupport": true,
                        "symbolKind": { "valueSet": (1..=26).collect::<Vec<u32>>() }
                    }
                },
                "workspace": {
                    "workspaceFolders": true,
                    "didChangeConfiguration": { "dynamicRegistration": true }
                }
            },
            "processId": std::process::id(),
            "rootPath": root.display().to_string(),
            "rootUri": root_uri.as_str(),
            "workspaceFolders": [protocol::workspace_folder(root, root_uri.as_str())]
        }))
    }

    fn is_ignored_dirname(&self, name: &str) -> bool {
        name.starts_with('.') || IGNORED_DIRS.contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(spec: &LaunchSpec) -> Vec<String> {
        spec.arguments()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    // ── Command line ───────────────────────────────────────────────────

    #[test]
    fn test_default_settings_run_bare_qmlls() {
        let spec = QmlAdapter::default().command_line(Path::new("/repo"));
        assert_eq!(spec.program(), Path::new("qmlls"));
        assert!(spec.arguments().is_empty());
        assert_eq!(spec.cwd(), Path::new("/repo"));
    }

    #[test]
    fn test_all_settings_in_flag_order() {
        let adapter = QmlAdapter::new(QmlSettings {
            build_dir: Some("build".into()),
            import_paths: vec!["imports".into(), "/opt/qt/qml".into()],
            use_environment_import_paths: true,
            no_cmake_calls: true,
            doc_dir: Some("doc".into()),
        });
        let spec = adapter.command_line(Path::new("/repo"));
        assert_eq!(
            args(&spec),
            [
                "--build-dir",
                "/repo/build",
                "-I",
                "/repo/imports",
                "-I",
                "/opt/qt/qml",
                "-E",
                "--no-cmake-calls",
                "-d",
                "/repo/doc",
            ]
        );
    }

    #[test]
    fn test_absolute_build_dir_is_kept() {
        let adapter = QmlAdapter::new(QmlSettings {
            build_dir: Some("/tmp/qt-build".into()),
            ..QmlSettings::default()
        });
        let spec = adapter.command_line(Path::new("/repo"));
        assert_eq!(args(&spec), ["--build-dir", "/tmp/qt-build"]);
    }

    // ── Handshake params ───────────────────────────────────────────────

    #[test]
    fn test_initialize_params_shape() {
        let params = QmlAdapter::default()
            .initialize_params(Path::new("/repo/app"))
            .unwrap();
        assert_eq!(params["locale"], "en");
        assert_eq!(params["rootUri"], "file:///repo/app");
        assert_eq!(params["rootPath"], "/repo/app");
        assert_eq!(params["workspaceFolders"][0]["name"], "app");

        let doc_symbol = &params["capabilities"]["textDocument"]["documentSymbol"];
        assert_eq!(doc_symbol["hierarchicalDocumentSymbolSupport"], true);
        let kinds = doc_symbol["symbolKind"]["valueSet"].as_array().unwrap();
        assert_eq!(kinds.len(), 26);
        assert_eq!(kinds[0], 1);
        assert_eq!(kinds[25], 26);
        assert_eq!(
            params["capabilities"]["textDocument"]["synchronization"]["didSave"],
            true
        );
    }

    #[test]
    fn test_initialize_params_reject_relative_root() {
        let err = QmlAdapter::default()
            .initialize_params(Path::new("relative"))
            .unwrap_err();
        assert!(matches!(err, StartupError::InvalidRoot { .. }));
    }

    // ── Walk filters ───────────────────────────────────────────────────

    #[test]
    fn test_ignored_directories() {
        let adapter = QmlAdapter::default();
        for name in ["build", "node_modules", ".git", ".qmlls.cache"] {
            assert!(adapter.is_ignored_dirname(name), "{name}");
        }
        assert!(!adapter.is_ignored_dirname("components"));
        assert!(adapter.is_source_file(Path::new("ui/Main.qml")));
        assert!(!adapter.is_source_file(Path::new("ui/main.js")));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: QmlSettings =
            serde_json::from_value(json!({ "import_paths": ["imports"], "no_cmake_calls": true }))
                .unwrap();
        assert_eq!(settings.import_paths, [PathBuf::from("imports")]);
        assert!(settings.no_cmake_calls);
        assert!(settings.build_dir.is_none());
        assert!(!settings.use_environment_import_paths);
    }
}
