//! Diagnostic system for compiler errors (§6.4, §7).
//!
//! The compiler's single-error cell stores a typed [`crate::error::CompileError`];
//! this module is the user-facing rendering of it — resolving a `Span` to a
//! line/column/snippet against the original source text (when available)
//! and formatting it the way a CLI or test harness would display it.

pub mod formatter;
pub mod normalizer;

use crate::error::CompileError;
use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic schema version.
pub const DIAG_VERSION: u32 = 1;

/// Severity level of a diagnostic. The compiler core only ever emits
/// `Error` (spec.md has no warning concept), but the field stays so a
/// future lint pass has somewhere to plug in without a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warning")]
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic message, ready to be printed or serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub diag_version: u32,
    pub level: DiagnosticLevel,
    /// Stable error code, e.g. `"C0001"`.
    pub code: String,
    pub message: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub help: Option<String>,
}

impl Diagnostic {
    /// Build a diagnostic from a typed compile error and the source text it
    /// was raised against (pass `""` when there is no real source, e.g. in
    /// tests that construct forms directly).
    pub fn from_compile_error(err: &CompileError, file: &str, source: &str) -> Self {
        let span = err.span();
        let (line, column) = resolve_line_column(source, span.start);
        let snippet = source.lines().nth(line.saturating_sub(1)).unwrap_or("").to_string();
        Diagnostic {
            diag_version: DIAG_VERSION,
            level: DiagnosticLevel::Error,
            code: err.code().to_string(),
            message: err.to_string(),
            file: file.to_string(),
            line,
            column,
            length: span.end.saturating_sub(span.start).max(1),
            snippet,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Format as a human-readable, one-error report with a caret line.
    pub fn to_human_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}[{}]: {}\n", self.level, self.code, self.message));
        out.push_str(&format!("  --> {}:{}:{}\n", self.file, self.line, self.column));
        if !self.snippet.is_empty() {
            out.push_str("   |\n");
            out.push_str(&format!("{:>2} | {}\n", self.line, self.snippet));
            let padding = " ".repeat(self.column.saturating_sub(1));
            let carets = "^".repeat(self.length.max(1));
            out.push_str(&format!("   | {}{}\n", padding, carets));
        }
        if let Some(help) = &self.help {
            out.push_str(&format!("   = help: {}\n", help));
        }
        out
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Resolve a byte offset to a 1-based (line, column) pair.
fn resolve_line_column(source: &str, offset: usize) -> (usize, usize) {
    if source.is_empty() {
        return (1, offset + 1);
    }
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_compile_error() {
        let err = CompileError::UnboundSymbol {
            name: "x".to_string(),
            span: Span::new(0, 1),
        };
        let diag = Diagnostic::from_compile_error(&err, "<input>", "x");
        assert_eq!(diag.code, "C0001");
        assert_eq!(diag.line, 1);
        assert_eq!(diag.column, 1);
    }

    #[test]
    fn resolves_multiline_offsets() {
        let (line, col) = resolve_line_column("ab\ncd\nef", 4);
        assert_eq!((line, col), (2, 2));
    }
}
