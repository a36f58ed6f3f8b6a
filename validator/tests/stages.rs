use std::fs;
use std::path::Path;

use snippets::config::{CorpusConfig, EnvironmentConfig, SynthConfig, TransformConfig};
use snippets::{Corpus, Pipeline, ScanOptions, Selection, SynthMode, Synthesizer, scan_document};
use validator::{Credentials, ExecuteConfig, Outcome, Sandbox, Stage, StageError, Validator};

fn synthesizer(mode: SynthMode, transform: &TransformConfig) -> Synthesizer {
    let pipeline = Pipeline::new(transform, &EnvironmentConfig::default()).expect("pipeline");
    Synthesizer::new(&SynthConfig::default(), pipeline).with_mode(mode)
}

fn lint_only(mode: SynthMode) -> Validator {
    let execute = ExecuteConfig {
        enabled: false,
        ..ExecuteConfig::default()
    };
    Validator::new(synthesizer(mode, &TransformConfig::default()), execute, Credentials::default())
        .expect("validator")
}

fn python_available() -> bool {
    Sandbox::new(&ExecuteConfig::default()).interpreter_available()
}

fn corpus_of(files: &[(&str, &str)]) -> (tempfile::TempDir, Corpus) {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap_or(Path::new("."))).unwrap();
        fs::write(path, content).unwrap();
    }
    let corpus = Corpus::scan(dir.path(), &CorpusConfig::default(), &ScanOptions::default()).unwrap();
    (dir, corpus)
}

const URL_PAGE: &str = "# Chat

```python
import requests

url = \"https://api.example.com/v3/llm/chat\"
```

Then send it:

```python
response = requests.post(url)
```
";

#[test]
fn page_mode_shares_earlier_bindings() {
    let doc = scan_document("guide.mdx", URL_PAGE, &ScanOptions::default()).unwrap();
    let results = lint_only(SynthMode::Page).validate_document(&doc, None);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry_point, "page");
    assert_eq!(results[0].outcome, Outcome::LintPass);
    assert_eq!(results[0].reached, Some(Stage::Linted));
}

#[test]
fn isolated_mode_reports_the_missing_binding() {
    let doc = scan_document("guide.mdx", URL_PAGE, &ScanOptions::default()).unwrap();
    let results = lint_only(SynthMode::Isolated).validate_document(&doc, None);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].outcome, Outcome::LintPass);

    let second = &results[1];
    assert_eq!(second.entry_point, "block_2");
    assert_eq!(second.outcome, Outcome::LintFail);
    assert_eq!(second.line, Some(12));
    let message = second.message.as_deref().unwrap();
    assert!(message.starts_with("`url` undefined"), "{}", message);
    assert!(message.contains("guide.mdx:4"), "{}", message);
    match &second.error {
        Some(StageError::UnresolvedName { name, .. }) => assert_eq!(name, "url"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn block_selection_in_page_mode_keeps_earlier_fragments() {
    let doc = scan_document("guide.mdx", URL_PAGE, &ScanOptions::default()).unwrap();
    let results = lint_only(SynthMode::Page).validate_document(&doc, Some(2));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].fragments, vec![0, 1]);
    assert_eq!(results[0].outcome, Outcome::LintPass);
}

#[test]
fn unterminated_string_and_bracket_fail_at_parse() {
    let (_dir, corpus) = corpus_of(&[
        ("string.mdx", "```python\nmessage = \"never closed\nprint(message)\n```\n"),
        ("bracket.mdx", "```python\ndata = {\"a\": [1, 2}\nprint(data)\n```\n"),
    ]);
    let report = lint_only(SynthMode::Page).validate_corpus(&corpus, &Selection::default(), 1);

    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(result.outcome, Outcome::SyntaxFail, "{}", result.label());
        assert_eq!(result.reached, None);
        assert_eq!(result.line, Some(2), "{}", result.label());
    }
    assert!(!report.is_ok());
    assert_eq!(report.summary.failed, 2);
}

#[test]
fn marked_partial_fragment_is_excluded() {
    let body = "```python\n\"key\": \"value\"\n```\n\n```python\nx = 1\nprint(x)\n```\n";
    let marked = format!("Request body excerpt:\n\n{{/* skip-test */}}\n{}", body);
    let (_dir, corpus) = corpus_of(&[("excerpt.mdx", &marked), ("bare.mdx", body)]);
    let validator = lint_only(SynthMode::Page);

    let marked_only = Selection {
        document: Some("excerpt".into()),
        block: None,
    };
    let report = validator.validate_corpus(&corpus, &marked_only, 1);
    assert!(report.is_ok());
    assert_eq!(report.summary.illustrative, 1);
    assert_eq!(report.summary.passed, 1);

    let unmarked_only = Selection {
        document: Some("bare".into()),
        block: None,
    };
    let report = validator.validate_corpus(&corpus, &unmarked_only, 1);
    assert_eq!(report.results[0].outcome, Outcome::SyntaxFail);
}

#[test]
fn structural_errors_fail_the_run_without_hiding_others() {
    let (_dir, corpus) = corpus_of(&[
        ("good.mdx", "```python\nprint(1)\n```\n"),
        ("broken.mdx", "```python\nprint(2)\n"),
    ]);
    let report = lint_only(SynthMode::Page).validate_corpus(&corpus, &Selection::default(), 2);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.structural, 1);
    assert_eq!(report.structural[0].document, "broken.mdx");
    assert!(!report.is_ok());
}

#[test]
fn credentials_are_injected_at_execution() {
    if !python_available() {
        return;
    }
    let validator = Validator::new(
        synthesizer(SynthMode::Page, &TransformConfig::default()),
        ExecuteConfig::default(),
        Credentials::default().with_primary("sk-test"),
    )
    .unwrap();

    let result = validator
        .validate_text("candidate", "API_KEY = \"sk-abc123\"\nprint(API_KEY)\n")
        .unwrap();
    assert_eq!(result.outcome, Outcome::ExecPass, "{:?}", result.message);
    assert_eq!(result.stdout.as_deref().map(str::trim), Some("sk-test"));
}

#[test]
fn runtime_failure_points_at_the_document_line() {
    if !python_available() {
        return;
    }
    let validator = Validator::new(
        synthesizer(SynthMode::Page, &TransformConfig::default()),
        ExecuteConfig::default(),
        Credentials::default().with_primary("sk-test"),
    )
    .unwrap();

    let doc = scan_document(
        "guide.mdx",
        "Intro\n\n```python\nvalue = 1\nprint(value / 0)\n```\n",
        &ScanOptions::default(),
    )
    .unwrap();
    let results = validator.validate_document(&doc, None);
    assert_eq!(results[0].outcome, Outcome::ExecFail);
    assert_eq!(results[0].line, Some(5));
    assert!(results[0].message.as_deref().unwrap().contains("ZeroDivisionError"));
}

#[test]
fn fixtures_are_readable_from_snippets() {
    if !python_available() {
        return;
    }
    let validator = Validator::new(
        synthesizer(SynthMode::Page, &TransformConfig::default()),
        ExecuteConfig::default(),
        Credentials::default().with_primary("sk-test"),
    )
    .unwrap();
    let code = "with open(\"invoice.pdf\", \"rb\") as f:\n    print(f.read(5))\nname = input(\"Name: \")\nprint(name)\n";
    let result = validator.validate_text("candidate", code).unwrap();
    assert_eq!(result.outcome, Outcome::ExecPass, "{:?}", result.stderr);
    assert!(result.stdout.unwrap().contains("test input"));
}

#[test]
fn missing_elevated_credential_skips_and_keeps_the_run_ok() {
    let transform = TransformConfig {
        elevated_documents: vec!["billing.mdx".into()],
        ..TransformConfig::default()
    };
    let validator = Validator::new(
        synthesizer(SynthMode::Page, &transform),
        ExecuteConfig::default(),
        Credentials::default().with_primary("sk-test"),
    )
    .unwrap();

    let (_dir, corpus) = corpus_of(&[("billing.mdx", "```python\nprint(\"invoice\")\n```\n")]);
    let report = validator.validate_corpus(&corpus, &Selection::default(), 1);

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].outcome, Outcome::ExecSkipped);
    assert!(report.results[0].message.as_deref().unwrap().contains("DOCS_PRODUCTION_API_TOKEN"));
    assert_eq!(report.summary.skipped, 1);
    assert!(report.is_ok());
}

#[test]
fn base_url_override_reaches_the_snippet() {
    if !python_available() {
        return;
    }
    let validator = Validator::new(
        synthesizer(SynthMode::Page, &TransformConfig::default()),
        ExecuteConfig::default(),
        Credentials::default()
            .with_primary("sk-test")
            .with_base_url("http://127.0.0.1:8089"),
    )
    .unwrap();

    let result = validator
        .validate_text("candidate", "url = \"https://api.example.com/v3/llm/chat\"\nprint(url)\n")
        .unwrap();
    assert_eq!(result.outcome, Outcome::ExecPass, "{:?}", result.stderr);
    assert_eq!(result.stdout.as_deref().map(str::trim), Some("http://127.0.0.1:8089/v3/llm/chat"));
}

const LATE_BINDING_PAGE: &str = "# Chat

```python
response = requests.get(url)
```

```python
url = \"https://api.example.com/v3/llm/chat\"
```
";

#[test]
fn page_mode_rejects_reads_of_later_bindings() {
    let doc = scan_document("order.mdx", LATE_BINDING_PAGE, &ScanOptions::default()).unwrap();
    let results = lint_only(SynthMode::Page).validate_document(&doc, None);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::LintFail);
    assert_eq!(results[0].line, Some(4));
    let message = results[0].message.as_deref().unwrap();
    assert!(
        message.starts_with("`url` undefined (bound later by fragment 2 at order.mdx:8"),
        "{}",
        message
    );
}

#[test]
fn page_mode_rejects_reads_shadowed_by_a_later_fragment() {
    let src = "```python\nprint(json.dumps({\"a\": 1}))\n```\n\n```python\njson = {\"a\": 1}\nprint(json)\n```\n";
    let doc = scan_document("shadow.mdx", src, &ScanOptions::default()).unwrap();
    let results = lint_only(SynthMode::Page).validate_document(&doc, None);

    assert_eq!(results[0].outcome, Outcome::LintFail);
    assert_eq!(results[0].line, Some(2));
    let message = results[0].message.as_deref().unwrap();
    assert!(message.starts_with("`json` undefined"), "{}", message);
    assert!(message.contains("rebound by fragment 2 at shadow.mdx:6"), "{}", message);
}

#[test]
fn page_mode_allows_calls_deferred_past_the_binding() {
    let src = "```python\ndef show():\n    print(token)\n```\n\n```python\ntoken = \"x\"\nshow()\n```\n";
    let doc = scan_document("deferred.mdx", src, &ScanOptions::default()).unwrap();
    let results = lint_only(SynthMode::Page).validate_document(&doc, None);
    assert_eq!(results[0].outcome, Outcome::LintPass, "{:?}", results[0].message);
}
