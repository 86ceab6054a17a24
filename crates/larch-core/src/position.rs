//! Source positions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a token, AST node, symbol, or instruction came from.
///
/// `newline` marks the first token of a logical line (the preprocessor keys
/// directive recognition off it); `whitespace` marks a token preceded by
/// spacing (stringization preserves it). Positions are set once by the
/// tokenizer and copied around verbatim after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Index into the stream table.
    pub stream: u32,
    pub line: u32,
    pub col: u16,
    pub newline: bool,
    pub whitespace: bool,
}

impl Position {
    pub fn new(stream: u32, line: u32, col: u16) -> Self {
        Position {
            stream,
            line,
            col,
            newline: false,
            whitespace: false,
        }
    }

    /// The "nowhere" position used for synthesized objects.
    pub fn none() -> Self {
        Position::new(u32::MAX, 0, 0)
    }

    pub fn is_none(&self) -> bool {
        self.stream == u32::MAX
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_line_col() {
        let pos = Position::new(0, 12, 7);
        assert_eq!(pos.to_string(), "12:7");
    }

    #[test]
    fn none_position_is_recognizable() {
        assert!(Position::none().is_none());
        assert!(!Position::new(0, 1, 1).is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let mut pos = Position::new(2, 40, 3);
        pos.newline = true;
        let json = serde_json::to_string(&pos).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(pos, back);
    }
}
