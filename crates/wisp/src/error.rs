//! Error types for the compiler and the VM.
//!
//! Modeled directly on `litter::error` (`littrs::error` is declared in
//! `littrs::lib` but wasn't present in the retrieved pack; `litter`, its
//! predecessor crate in the same workspace, keeps the same `thiserror`-derived
//! shape one generation earlier).

use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// A compile-time failure: one or more diagnostics were reported while
/// scanning/parsing/emitting. Matches spec.md §4.2 — "compilation does not
/// abort on first error"; every diagnostic raised along the way is kept.
#[derive(Debug, Error)]
#[error("{}", render(&self.0))]
pub struct CompileError(pub Vec<Diagnostic>);

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single frame in a runtime error's stack trace, rendered as
/// `[line L] in <name>()` or `[line L] in script`, per spec.md §4.4.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the top-level script frame.
    pub function_name: Option<String>,
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.function_name {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime failure: aborts the current `interpret`/`run` call, carrying a
/// message and the call-frame trace captured at the point of failure.
///
/// Rendered across multiple lines (message, then one line per trace frame),
/// which doesn't fit thiserror's single-line `#[error("...")]` attribute, so
/// `Display`/`std::error::Error` are implemented by hand instead of derived.
#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, trace: Vec<TraceFrame>) -> Self {
        Self {
            message: message.into(),
            trace,
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in &self.trace {
            writeln!(f, "{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Top-level error type returned by [`crate::Interpreter::run`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, Error>;
