use std::fmt;

use serde::Serialize;

use crate::error::StageError;

/// Last stage an entry point got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parsed,
    Linted,
    Executed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Parsed => write!(f, "parsed"),
            Stage::Linted => write!(f, "linted"),
            Stage::Executed => write!(f, "executed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    SyntaxFail,
    LintFail,
    /// Linted with execution disabled.
    LintPass,
    ExecFail,
    ExecPass,
    ExecSkipped,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::SyntaxFail | Outcome::LintFail | Outcome::ExecFail)
    }

    pub fn is_pass(self) -> bool {
        matches!(self, Outcome::LintPass | Outcome::ExecPass)
    }

    pub fn is_skip(self) -> bool {
        self == Outcome::ExecSkipped
    }

    /// Stage reached by an entry point that ended here.
    pub fn reached(self) -> Option<Stage> {
        match self {
            Outcome::SyntaxFail => None,
            Outcome::LintFail => Some(Stage::Parsed),
            Outcome::LintPass | Outcome::ExecSkipped => Some(Stage::Linted),
            Outcome::ExecFail | Outcome::ExecPass => Some(Stage::Executed),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::SyntaxFail => "syntax-fail",
            Outcome::LintFail => "lint-fail",
            Outcome::LintPass => "lint-pass",
            Outcome::ExecFail => "exec-fail",
            Outcome::ExecPass => "exec-pass",
            Outcome::ExecSkipped => "exec-skipped",
        };
        write!(f, "{}", s)
    }
}

/// Result of validating one entry point.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub document: String,
    pub module: String,
    pub entry_point: String,
    /// Ordinals of the fragments the entry point runs.
    pub fragments: Vec<usize>,
    /// First code line of each of those fragments.
    pub lines: Vec<usize>,
    pub reached: Option<Stage>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Document line the diagnostic points at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip)]
    pub error: Option<StageError>,
}

impl ValidationResult {
    /// `path::entry_point`
    pub fn label(&self) -> String {
        format!("{}::{}", self.document, self.entry_point)
    }

    /// `path:line` of the diagnostic, or of the first fragment.
    pub fn location(&self) -> String {
        match self.line.or_else(|| self.lines.first().copied()) {
            Some(line) => format!("{}:{}", self.document, line),
            None => self.document.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reached_stages_escalate() {
        assert_eq!(Outcome::SyntaxFail.reached(), None);
        assert!(Outcome::LintFail.reached() < Outcome::LintPass.reached());
        assert!(Outcome::ExecSkipped.reached() < Outcome::ExecPass.reached());
    }

    #[test]
    fn skips_are_neither_pass_nor_failure() {
        assert!(!Outcome::ExecSkipped.is_failure());
        assert!(!Outcome::ExecSkipped.is_pass());
        assert!(Outcome::LintPass.is_pass());
        assert!(Outcome::ExecFail.is_failure());
    }
}
