//! Text positions and locations as reported by language servers.
//!
//! Lines and characters are 0-indexed, exactly as on the wire. Display code
//! adds one when it shows them to humans.

use serde::{Deserialize, Serialize};

/// A zero-based line/character position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open span between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Whether `pos` lies inside this range (end exclusive).
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// A range inside a document identified by URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    #[must_use]
    pub fn new(uri: impl Into<String>, range: Range) -> Self {
        Self {
            uri: uri.into(),
            range,
        }
    }

    /// Format as `uri:line:col` (1-indexed for display).
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{}:{}:{}",
            self.uri,
            self.range.start.line + 1,
            self.range.start.character + 1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_deserializes_from_lsp_shape() {
        let json = serde_json::json!({
            "uri": "file:///repo/Main.qml",
            "range": {
                "start": { "line": 8, "character": 4 },
                "end": { "line": 8, "character": 43 }
            }
        });
        let loc: Location = serde_json::from_value(json).unwrap();
        assert_eq!(loc.range.start, Position::new(8, 4));
        assert!(loc.uri.ends_with("Main.qml"));
    }

    #[test]
    fn test_range_contains_is_end_exclusive() {
        let range = Range::new(Position::new(1, 0), Position::new(1, 5));
        assert!(range.contains(Position::new(1, 0)));
        assert!(range.contains(Position::new(1, 4)));
        assert!(!range.contains(Position::new(1, 5)));
        assert!(!range.contains(Position::new(0, 9)));
    }

    #[test]
    fn test_location_display_is_one_indexed() {
        let loc = Location::new(
            "file:///a.qml",
            Range::new(Position::new(0, 0), Position::new(0, 1)),
        );
        assert_eq!(loc.display(), "file:///a.qml:1:1");
    }
}
