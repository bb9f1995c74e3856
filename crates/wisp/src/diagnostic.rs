//! Source diagnostics.
//!
//! Simplified relative to `littrs::diagnostic` (no source-snippet
//! rendering, no labels/notes/help) because the scanner only tracks line
//! numbers, not byte spans — spec.md's error format is `[line L] Error
//! <where>: <message>`, which needs nothing richer than that.

use std::fmt;

/// A single compile-time diagnostic.
///
/// `where_` is the token-level location description clox prints between the
/// line number and the message — usually `at 'lexeme'` or `at end`.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: u32,
    pub where_: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, where_: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            where_: where_.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.where_.is_empty() {
            write!(f, "[line {}] Error: {}", self.line, self.message)
        } else {
            write!(f, "[line {}] Error {}: {}", self.line, self.where_, self.message)
        }
    }
}
