//! Core domain types for polyglot.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: adapters build [`LaunchSpec`]s,
//! the LSP client produces [`Location`]s and [`Symbol`]s, and the CLI prints them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod location;
mod symbol;

pub use location::{Location, Position, Range};
pub use symbol::{Symbol, SymbolKind, SymbolTreeNode, WorkspaceSymbol};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

// ============================================================================
// Launch specification
// ============================================================================

/// How to start a language server process.
///
/// Built once by an adapter and never mutated afterwards: the builder methods
/// consume `self`, and the accessors only hand out shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: PathBuf,
    env: Vec<(OsString, OsString)>,
}

impl LaunchSpec {
    /// Start a spec for `program` running in `cwd`.
    ///
    /// `program` may be a bare name (resolved on `PATH` at spawn time) or a path.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an extra environment variable for the child.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub fn envs(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    /// Render the command line for logs (`qmlls -I /x --no-cmake-calls`).
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}
