use std::fs;
use std::path::Path;

use serde::Serialize;

use snippets::{Classification, Corpus, CorpusError, Selection, SynthMode};

use crate::outcome::ValidationResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub documents: usize,
    pub entry_points: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Fragments excluded by a marker.
    pub illustrative: usize,
    /// Non-selected code group panels.
    pub alternate: usize,
    /// Documents rejected with a structural error.
    pub structural: usize,
}

impl RunSummary {
    /// Counts for a set of results; corpus-level fields stay zero.
    pub fn tally(results: &[ValidationResult]) -> RunSummary {
        let mut summary = RunSummary {
            entry_points: results.len(),
            ..RunSummary::default()
        };
        for result in results {
            match result.outcome {
                o if o.is_pass() => summary.passed += 1,
                o if o.is_failure() => summary.failed += 1,
                o if o.is_skip() => summary.skipped += 1,
                _ => {}
            }
        }
        summary
    }

    /// Skips never fail a run.
    pub fn is_ok(&self) -> bool {
        self.failed == 0 && self.structural == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralFailure {
    pub document: String,
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: SynthMode,
    pub summary: RunSummary,
    pub results: Vec<ValidationResult>,
    pub structural: Vec<StructuralFailure>,
}

impl RunReport {
    pub fn new(
        mode: SynthMode,
        corpus: &Corpus,
        selection: &Selection,
        results: Vec<ValidationResult>,
    ) -> RunReport {
        let structural: Vec<StructuralFailure> = corpus
            .rejected_in(selection)
            .map(|r| StructuralFailure {
                document: r.path.clone(),
                line: r.error.line,
                message: r.error.message.clone(),
            })
            .collect();

        let mut summary = RunSummary::tally(&results);
        summary.structural = structural.len();
        for doc in corpus.select(selection) {
            summary.documents += 1;
            summary.illustrative += doc.count(Classification::Illustrative);
            summary.alternate += doc.count(Classification::Alternate);
        }

        RunReport {
            mode,
            summary,
            results,
            structural,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.summary.is_ok()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), CorpusError> {
        let json = self
            .to_json()
            .map_err(|e| CorpusError::io(path, std::io::Error::other(e)))?;
        fs::write(path, json + "\n").map_err(|e| CorpusError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use snippets::{ScanOptions, scan_document};

    fn result(outcome: Outcome) -> ValidationResult {
        ValidationResult {
            document: "a.mdx".into(),
            module: "a".into(),
            entry_point: "page".into(),
            fragments: vec![0],
            lines: vec![2],
            reached: outcome.reached(),
            outcome,
            message: None,
            line: None,
            stdout: None,
            stderr: None,
            elapsed_ms: None,
            error: None,
        }
    }

    #[test]
    fn skips_keep_the_run_ok() {
        let doc = scan_document(
            "a.mdx",
            "{/* skip-test */}\n```python\n\"k\": \"v\"\n```\n```python\nx = 1\n```\n",
            &ScanOptions::default(),
        )
        .unwrap();
        let corpus = Corpus::from_documents(".", vec![doc]);
        let report = RunReport::new(
            SynthMode::Page,
            &corpus,
            &Selection::default(),
            vec![result(Outcome::ExecPass), result(Outcome::ExecSkipped)],
        );
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.illustrative, 1);
        assert!(report.is_ok());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"outcome\": \"exec_skipped\""));
        assert!(json.contains("\"mode\": \"page\""));
    }

    #[test]
    fn any_failure_fails_the_run() {
        let corpus = Corpus::from_documents(".", Vec::new());
        let report = RunReport::new(
            SynthMode::Page,
            &corpus,
            &Selection::default(),
            vec![result(Outcome::LintFail)],
        );
        assert!(!report.is_ok());
        assert_eq!(report.failures().count(), 1);
    }
}
