//! Validation of Python code inside free-form answers (for example, text
//! produced by a documentation Q&A service).

use snippets::answer::extract_blocks;
use tracing::debug;

use crate::outcome::ValidationResult;
use crate::pipeline::Validator;

/// Validate every block of `markdown` tagged with one of `languages` (the
/// corpus `languages` setting). Each block is its own document named
/// `<name>#<n>`, so line numbers are answer lines.
pub fn validate_answer(
    validator: &Validator,
    name: &str,
    markdown: &str,
    languages: &[String],
) -> Vec<ValidationResult> {
    let blocks = extract_blocks(markdown, languages);
    debug!(answer = name, blocks = blocks.len(), "validating answer");
    blocks
        .iter()
        .flat_map(|block| validator.validate_document(&block.to_document(name), None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, ExecuteConfig};
    use crate::outcome::Outcome;
    use snippets::config::{CorpusConfig, EnvironmentConfig, SynthConfig, TransformConfig};
    use snippets::{Pipeline, Synthesizer};

    fn lint_only() -> Validator {
        let pipeline = Pipeline::new(&TransformConfig::default(), &EnvironmentConfig::default()).unwrap();
        let execute = ExecuteConfig {
            enabled: false,
            ..ExecuteConfig::default()
        };
        Validator::new(Synthesizer::new(&SynthConfig::default(), pipeline), execute, Credentials::default())
            .unwrap()
    }

    fn default_languages() -> Vec<String> {
        CorpusConfig::default().languages
    }

    #[test]
    fn each_block_is_validated_with_answer_lines() {
        let validator = lint_only();
        let answer = "Try this:\n\n```python\nprint('ok')\n```\n\nThen:\n\n```python\nprint(undefined_thing)\n```\n";
        let results = validate_answer(&validator, "answer", answer, &default_languages());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Outcome::LintPass);
        assert_eq!(results[1].document, "answer#2");
        assert_eq!(results[1].outcome, Outcome::LintFail);
        assert_eq!(results[1].line, Some(10));
    }

    #[test]
    fn prose_only_answer_has_no_results() {
        assert!(validate_answer(&lint_only(), "answer", "No code here.", &default_languages()).is_empty());
    }

    #[test]
    fn only_configured_languages_are_validated() {
        let answer = "```python\nprint(1)\n```\n\n```pycon\nprint(undefined_thing)\n```\n";
        let validator = lint_only();

        let results = validate_answer(&validator, "answer", answer, &["pycon".to_string()]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::LintFail);
        assert_eq!(results[0].line, Some(6));

        let results = validate_answer(&validator, "answer", answer, &default_languages());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::LintPass);
    }
}
