use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};
use thiserror::Error;

/// A defect in a document's fence layout (unterminated fence, unclosed
/// group). Halts processing of that document only.
#[derive(Debug, Clone)]
pub struct StructuralError {
    pub document: String,
    pub message: String,
    /// 1-based line where the offending construct starts.
    pub line: usize,
    pub span: Range<usize>,
    pub notes: Vec<String>,
}

impl StructuralError {
    pub fn new(
        document: impl Into<String>,
        message: impl Into<String>,
        line: usize,
        span: Range<usize>,
    ) -> Self {
        StructuralError {
            document: document.into(),
            message: message.into(),
            line,
            span,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        Diagnostic::new(Severity::Error)
            .with_message(&self.message)
            .with_labels(vec![Label::primary(file_id, self.span.clone())])
            .with_notes(self.notes.clone())
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.document, self.line, self.message)
    }
}

impl std::error::Error for StructuralError {}

/// Failures that prevent reading the corpus or writing generated output.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("cannot read corpus root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl CorpusError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CorpusError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        CorpusError::Pattern {
            pattern: pattern.into(),
            source,
        }
    }
}
