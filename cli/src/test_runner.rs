use std::collections::BTreeMap;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};

use snippets::document::line_span;
use snippets::{Corpus, RejectedDocument};
use validator::{RunReport, RunSummary, ValidationResult};

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn skip_label(no_color: bool) -> &'static str {
    if no_color { "SKIP" } else { "\x1b[33mSKIP\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

/// Renders diagnostics against document sources, registering each document
/// once.
pub struct Renderer<'a> {
    files: SimpleFiles<String, String>,
    ids: BTreeMap<String, usize>,
    source_of: Box<dyn Fn(&str) -> Option<&'a str> + 'a>,
    writer: StandardStream,
    config: term::Config,
}

impl<'a> Renderer<'a> {
    pub fn new(no_color: bool, source_of: impl Fn(&str) -> Option<&'a str> + 'a) -> Self {
        let color_choice = if no_color {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        };
        Renderer {
            files: SimpleFiles::new(),
            ids: BTreeMap::new(),
            source_of: Box::new(source_of),
            writer: StandardStream::stderr(color_choice),
            config: term::Config::default(),
        }
    }

    pub fn for_corpus(corpus: &'a Corpus, no_color: bool) -> Self {
        Renderer::new(no_color, move |path| {
            corpus
                .documents
                .iter()
                .find(|d| d.path == path)
                .map(|d| d.source.as_str())
        })
    }

    fn file_id(&mut self, name: &str, source: &str) -> usize {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.files.add(name.to_string(), source.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    fn emit(&self, diagnostic: &Diagnostic<usize>) {
        let _ = term::emit_to_write_style(&mut self.writer.lock(), &self.config, &self.files, diagnostic);
    }

    /// Point at the document line of a failed entry point. Returns false
    /// when there is no line or no source to point into.
    pub fn failure(&mut self, result: &ValidationResult) -> bool {
        let Some(line) = result.line else {
            return false;
        };
        let Some(source) = (self.source_of)(result.document.as_str()) else {
            return false;
        };
        let span = line_span(source, line);
        let file_id = self.file_id(&result.document, source);
        let diagnostic = Diagnostic::error()
            .with_message(result.message.clone().unwrap_or_else(|| result.outcome.to_string()))
            .with_labels(vec![Label::primary(file_id, span).with_message(result.outcome.to_string())])
            .with_notes(vec![format!("in {} ({})", result.entry_point, result.module)]);
        self.emit(&diagnostic);
        true
    }

    pub fn structural(&mut self, rejected: &RejectedDocument) {
        let file_id = self.file_id(&rejected.path, &rejected.source);
        self.emit(&rejected.error.to_diagnostic(file_id));
    }
}

/// Print per-entry-point lines, failure details and the summary.
/// Returns the exit code: 0 when the run is ok, 1 otherwise.
pub fn print_report(report: &RunReport, corpus: &Corpus, no_color: bool) -> i32 {
    let mut renderer = Renderer::for_corpus(corpus, no_color);
    print_results(&report.results, &mut renderer, no_color);

    let rejected: Vec<&RejectedDocument> = corpus
        .rejected
        .iter()
        .filter(|r| report.structural.iter().any(|s| s.document == r.path))
        .collect();
    if !rejected.is_empty() {
        eprintln!();
        eprintln!("structural errors:");
        eprintln!();
        for r in rejected {
            renderer.structural(r);
        }
    }

    print_summary(&report.summary, no_color)
}

/// Print the results of a single candidate (answer text or script).
pub fn print_candidate(results: &[ValidationResult], source: &str, no_color: bool) -> i32 {
    if results.is_empty() {
        eprintln!("no Python code found");
        return 0;
    }
    let mut renderer = Renderer::new(no_color, move |_| Some(source));
    print_results(results, &mut renderer, no_color);
    print_summary(&RunSummary::tally(results), no_color)
}

fn print_results(results: &[ValidationResult], renderer: &mut Renderer<'_>, no_color: bool) {
    let mut current: Option<&str> = None;
    let mut failures: Vec<&ValidationResult> = Vec::new();

    for result in results {
        if current != Some(result.document.as_str()) {
            eprintln!();
            eprintln!("{}", bold(&result.document, no_color));
            current = Some(result.document.as_str());
        }
        match result.outcome {
            o if o.is_failure() => {
                eprintln!("  {}  {}  {}", fail_label(no_color), result.entry_point, result.location());
                failures.push(result);
            }
            o if o.is_skip() => {
                let reason = result.message.as_deref().unwrap_or("skipped");
                eprintln!("  {}  {}  ({})", skip_label(no_color), result.entry_point, reason);
            }
            _ => eprintln!("  {}  {}", pass_label(no_color), result.entry_point),
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for f in &failures {
            eprintln!();
            eprintln!("  --- {} ---", f.label());
            eprintln!("  {} at {}", f.outcome, f.location());
            if let Some(message) = &f.message {
                for line in message.lines() {
                    eprintln!("  {}", line);
                }
            }
            if let Some(stderr) = f.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
                eprintln!("  stderr:");
                for line in stderr.lines() {
                    eprintln!("    {}", line);
                }
            }
            if renderer.failure(f) {
                eprintln!();
            }
        }
    }
}

fn print_summary(summary: &RunSummary, no_color: bool) -> i32 {
    let counts = format!(
        "{} passed, {} failed, {} skipped; {} illustrative, {} alternate, {} structural",
        summary.passed,
        summary.failed,
        summary.skipped,
        summary.illustrative,
        summary.alternate,
        summary.structural
    );
    eprintln!();
    if summary.is_ok() {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {}", ok, counts);
        0
    } else {
        let failed = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        eprintln!("test result: {}. {} (of {})", failed, counts, summary.entry_points);
        1
    }
}
