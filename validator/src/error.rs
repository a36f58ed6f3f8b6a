use thiserror::Error;

/// Why an entry point stopped short of `ExecPass`. Lines are document lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("syntax error: {message}")]
    Syntax { message: String, line: Option<usize> },

    #[error("`{name}` undefined{}", parenthesized(.hint))]
    UnresolvedName {
        name: String,
        line: Option<usize>,
        hint: Option<String>,
    },

    #[error("execution failed: {message}")]
    Execution { message: String, line: Option<usize> },

    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("skipped: {reason}")]
    CapabilityGap { reason: String },

    #[error("cannot prepare execution: {0}")]
    Io(String),
}

fn parenthesized(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" ({})", h),
        None => String::new(),
    }
}

impl StageError {
    pub fn line(&self) -> Option<usize> {
        match self {
            StageError::Syntax { line, .. }
            | StageError::UnresolvedName { line, .. }
            | StageError::Execution { line, .. } => *line,
            _ => None,
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_name_messages() {
        let plain = StageError::UnresolvedName {
            name: "url".into(),
            line: Some(4),
            hint: None,
        };
        assert_eq!(plain.to_string(), "`url` undefined");

        let hinted = StageError::UnresolvedName {
            name: "url".into(),
            line: Some(4),
            hint: Some("bound by block 1 at guide.mdx:3".into()),
        };
        assert_eq!(hinted.to_string(), "`url` undefined (bound by block 1 at guide.mdx:3)");
        assert_eq!(hinted.line(), Some(4));
    }
}
