//! Shared test utilities and fixtures
//!
//! End-to-end tests need a real `qmlls`; without one they print a note and
//! pass.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use polyglot_adapters::{QML_PROBE_TIMEOUT, QmlAdapter};
use polyglot_lsp::{ClientOptions, Connection, probe_binary};

/// The QML fixture repository.
pub fn qml_fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("tests")
        .join("fixtures")
        .join("qml")
}

pub fn qmlls_available() -> bool {
    probe_binary("qmlls", &["--help"], QML_PROBE_TIMEOUT).is_found()
}

/// Start `qmlls` on the fixture repository, or `None` when it is not installed.
pub async fn start_qml() -> Option<Connection> {
    if !qmlls_available() {
        eprintln!("qmlls not installed; skipping end-to-end QML test");
        return None;
    }
    let connection = Connection::start(
        Arc::new(QmlAdapter::default()),
        qml_fixture_root(),
        ClientOptions::default(),
    )
    .await
    .expect("qmlls should start on the fixture repository");
    Some(connection)
}

/// Path to the built `polyglot` binary.
pub fn polyglot_bin() -> &'static str {
    env!("CARGO_BIN_EXE_polyglot")
}
