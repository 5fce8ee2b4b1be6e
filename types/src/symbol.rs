//! Symbols returned by document/workspace symbol queries.

use serde::{Deserialize, Serialize};

use crate::location::{Location, Range};

/// LSP symbol kind (`SymbolKind` in the protocol, numbered 1..=26).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    File,
    Module,
    Namespace,
    Package,
    Class,
    Method,
    Property,
    Field,
    Constructor,
    Enum,
    Interface,
    Function,
    Variable,
    Constant,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Key,
    Null,
    EnumMember,
    Struct,
    Event,
    Operator,
    TypeParameter,
    /// A kind number outside the range the protocol defines.
    Other(u32),
}

impl SymbolKind {
    const KNOWN: [Self; 26] = [
        Self::File,
        Self::Module,
        Self::Namespace,
        Self::Package,
        Self::Class,
        Self::Method,
        Self::Property,
        Self::Field,
        Self::Constructor,
        Self::Enum,
        Self::Interface,
        Self::Function,
        Self::Variable,
        Self::Constant,
        Self::String,
        Self::Number,
        Self::Boolean,
        Self::Array,
        Self::Object,
        Self::Key,
        Self::Null,
        Self::EnumMember,
        Self::Struct,
        Self::Event,
        Self::Operator,
        Self::TypeParameter,
    ];

    /// Convert from the LSP numeric kind. Unknown numbers are kept as [`SymbolKind::Other`].
    #[must_use]
    pub fn from_lsp(value: u32) -> Self {
        value
            .checked_sub(1)
            .and_then(|idx| Self::KNOWN.get(idx as usize))
            .copied()
            .unwrap_or(Self::Other(value))
    }

    /// The LSP numeric kind.
    #[must_use]
    pub fn to_lsp(self) -> u32 {
        match self {
            Self::Other(value) => value,
            known => Self::KNOWN
                .iter()
                .position(|k| *k == known)
                .map_or(0, |idx| idx as u32 + 1),
        }
    }
}

/// A symbol inside one document, possibly with nested children.
///
/// Flat `SymbolInformation` answers are represented with empty `children`
/// and `selection_range == range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Symbol>,
}

impl Symbol {
    /// All symbols in this subtree, depth-first, parents before children.
    #[must_use]
    pub fn flatten(&self) -> Vec<&Symbol> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    /// Find the first symbol named `name` in this subtree.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.flatten().into_iter().find(|s| s.name == name)
    }
}

/// A match from a `workspace/symbol` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSymbol {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    pub location: Location,
}

/// A node of the repository-wide symbol tree.
///
/// Directories use [`SymbolKind::Package`], files use [`SymbolKind::File`],
/// and everything below a file comes from the server's document symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolTreeNode {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SymbolTreeNode>,
}

impl SymbolTreeNode {
    /// Build the subtree for one document symbol.
    #[must_use]
    pub fn from_symbol(uri: &str, symbol: &Symbol) -> Self {
        Self {
            name: symbol.name.clone(),
            kind: symbol.kind,
            location: Some(Location::new(uri, symbol.selection_range)),
            children: symbol
                .children
                .iter()
                .map(|child| Self::from_symbol(uri, child))
                .collect(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Position;

    fn range(line: u32) -> Range {
        Range::new(Position::new(line, 0), Position::new(line, 10))
    }

    fn symbol(name: &str, kind: SymbolKind, line: u32, children: Vec<Symbol>) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind,
            detail: None,
            range: range(line),
            selection_range: range(line),
            children,
        }
    }

    #[test]
    fn test_symbol_kind_from_lsp_known_values() {
        assert_eq!(SymbolKind::from_lsp(1), SymbolKind::File);
        assert_eq!(SymbolKind::from_lsp(7), SymbolKind::Property);
        assert_eq!(SymbolKind::from_lsp(26), SymbolKind::TypeParameter);
    }

    #[test]
    fn test_symbol_kind_unknown_is_preserved() {
        assert_eq!(SymbolKind::from_lsp(0), SymbolKind::Other(0));
        assert_eq!(SymbolKind::from_lsp(99), SymbolKind::Other(99));
        assert_eq!(SymbolKind::Other(99).to_lsp(), 99);
    }

    #[test]
    fn test_symbol_kind_to_lsp_matches_from_lsp() {
        for value in 1..=26 {
            assert_eq!(SymbolKind::from_lsp(value).to_lsp(), value);
        }
    }

    #[test]
    fn test_flatten_is_depth_first() {
        let root = symbol(
            "root",
            SymbolKind::Object,
            0,
            vec![
                symbol(
                    "greeting",
                    SymbolKind::Property,
                    8,
                    vec![symbol("inner", SymbolKind::Variable, 9, vec![])],
                ),
                symbol("increment", SymbolKind::Method, 11, vec![]),
            ],
        );
        let names: Vec<_> = root.flatten().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["root", "greeting", "inner", "increment"]);
        assert_eq!(root.find("increment").map(|s| s.range.start.line), Some(11));
        assert!(root.find("missing").is_none());
    }

    #[test]
    fn test_tree_node_from_symbol_counts_children() {
        let root = symbol(
            "root",
            SymbolKind::Object,
            0,
            vec![symbol("greeting", SymbolKind::Property, 8, vec![])],
        );
        let node = SymbolTreeNode::from_symbol("file:///Main.qml", &root);
        assert_eq!(node.count(), 2);
        assert_eq!(
            node.children[0].location.as_ref().map(|l| l.range.start.line),
            Some(8)
        );
    }

    #[test]
    fn test_symbol_kind_serializes_snake_case() {
        let json = serde_json::to_value(SymbolKind::EnumMember).unwrap();
        assert_eq!(json, "enum_member");
    }
}
