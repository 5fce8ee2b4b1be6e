//! Concrete [`LanguageAdapter`](polyglot_lsp::LanguageAdapter)s.
//!
//! - [`QmlAdapter`]: Qt's `qmlls`, configured through [`QmlSettings`].
//! - [`CommandAdapter`]: any server started from a configured command line.

mod command;
mod qml;

pub use command::{CommandAdapter, CommandServerConfig};
pub use qml::{QML_PROBE_TIMEOUT, QmlAdapter, QmlSettings};
