//! End-to-end scenarios against a real `qmlls`.
//!
//! Fixture positions (0-based) in `Main.qml`:
//! - line 8: `property string greeting` declaration
//! - line 9: `property int counter`, name at character 17
//! - line 12: `counter` used in `increment()`
//! - line 18: `root.greeting`, name at character 19
//! - line 25: `root.counter` used in `onClicked`

use polyglot_lsp::{ConnectionState, TerminationReason};
use polyglot_types::{Symbol, SymbolKind};

use crate::common::{qml_fixture_root, start_qml};

fn names(symbols: &[Symbol]) -> Vec<&str> {
    symbols
        .iter()
        .flat_map(Symbol::flatten)
        .map(|s| s.name.as_str())
        .collect()
}

#[tokio::test]
async fn qml_server_starts_and_stops() {
    let Some(connection) = start_qml().await else {
        return;
    };
    assert!(connection.state().is_ready());
    assert_eq!(
        connection.root(),
        std::fs::canonicalize(qml_fixture_root()).unwrap()
    );
    assert!(connection.capabilities().is_some());

    connection.shutdown().await;
    assert_eq!(
        connection.state(),
        ConnectionState::Terminated(TerminationReason::Shutdown)
    );
}

#[tokio::test]
async fn qml_document_symbols_main() {
    let Some(connection) = start_qml().await else {
        return;
    };
    let symbols = connection.document_symbols("Main.qml").await.unwrap();
    assert!(!symbols.is_empty(), "expected symbols in Main.qml");

    let greeting = symbols
        .iter()
        .find_map(|s| s.find("greeting"))
        .expect("greeting property in Main.qml");
    assert_eq!(greeting.range.start.line, 8);
    assert!(names(&symbols).contains(&"counter"));
    connection.shutdown().await;
}

#[tokio::test]
async fn qml_document_symbols_helper() {
    let Some(connection) = start_qml().await else {
        return;
    };
    let symbols = connection.document_symbols("Helper.qml").await.unwrap();
    assert!(!symbols.is_empty(), "expected symbols in Helper.qml");
    connection.shutdown().await;
}

#[tokio::test]
async fn qml_definition_within_file() {
    let Some(connection) = start_qml().await else {
        return;
    };
    let locations = connection.definition("Main.qml", 18, 19).await.unwrap();
    let first = locations.first().expect("definition of greeting");
    assert!(first.uri.ends_with("Main.qml"), "{}", first.uri);
    assert_eq!(first.range.start.line, 8);
    connection.shutdown().await;
}

#[tokio::test]
async fn qml_references_within_file() {
    let Some(connection) = start_qml().await else {
        return;
    };
    let references = connection
        .references("Main.qml", 9, 17, true)
        .await
        .unwrap();
    let lines: Vec<u32> = references.iter().map(|l| l.range.start.line).collect();
    assert!(lines.len() >= 2, "expected at least 2 references, got {lines:?}");
    assert!(lines.contains(&12), "{lines:?}");
    assert!(lines.contains(&25), "{lines:?}");
    connection.shutdown().await;
}

#[tokio::test]
async fn qml_full_symbol_tree() {
    let Some(connection) = start_qml().await else {
        return;
    };
    let tree = connection.full_symbol_tree().await.unwrap();
    let files: Vec<_> = tree
        .iter()
        .filter(|node| node.kind == SymbolKind::File)
        .collect();
    let file_names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(file_names, ["Helper.qml", "Main.qml"]);
    for file in files {
        assert!(!file.children.is_empty(), "{} has no symbols", file.name);
    }
    assert!(connection.open_documents().await.is_empty());
    connection.shutdown().await;
}
