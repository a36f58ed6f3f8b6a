//! The per-entry-point state machine:
//! `Parsed -> Linted -> Executed`, short-circuiting on the first failure.

use std::fs;
use std::time::Instant;

use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, info, warn};

use snippets::config::EnvironmentConfig;
use snippets::python::{self, ParseError};
use snippets::{Corpus, Document, EntryPoint, ForwardRead, LineMap, Selection, SynthesisUnit, SynthMode, Synthesizer};
use snippets::CorpusError;

use crate::config::{Credentials, ExecuteConfig};
use crate::error::StageError;
use crate::exec::{ExecOutput, Sandbox, truncate};
use crate::fixtures::Fixtures;
use crate::outcome::{Outcome, ValidationResult};
use crate::report::RunReport;

/// Validates synthesized entry points. Fixtures are provisioned once and
/// live as long as the validator.
#[derive(Debug)]
pub struct Validator {
    synthesizer: Synthesizer,
    execute: ExecuteConfig,
    credentials: Credentials,
    sandbox: Sandbox,
    fixtures: Option<Fixtures>,
    traceback: Regex,
}

impl Validator {
    pub fn new(
        synthesizer: Synthesizer,
        execute: ExecuteConfig,
        credentials: Credentials,
    ) -> Result<Validator, CorpusError> {
        let env = synthesizer.pipeline().environment().clone();
        let mut sandbox = Sandbox::new(&execute);
        for (key, value) in credentials.child_env(&env) {
            sandbox = sandbox.with_env(key, value);
        }
        let fixtures = if execute.enabled {
            let fixtures = Fixtures::provision().map_err(|e| CorpusError::io(std::env::temp_dir(), e))?;
            Some(fixtures)
        } else {
            None
        };
        let pattern = r#"File "([^"]+)", line (\d+)"#;
        let traceback = Regex::new(pattern).map_err(|e| CorpusError::pattern(pattern, e))?;

        Ok(Validator {
            synthesizer,
            execute,
            credentials,
            sandbox,
            fixtures,
            traceback,
        })
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn mode(&self) -> SynthMode {
        self.synthesizer.mode()
    }

    fn environment(&self) -> &EnvironmentConfig {
        self.synthesizer.pipeline().environment()
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run every stage for one entry point. Never panics on bad snippet
    /// input; every failure ends up in the returned result.
    pub fn validate_entry(&self, unit: &SynthesisUnit, entry: &EntryPoint) -> ValidationResult {
        let mut result = ValidationResult {
            document: unit.source_path.clone(),
            module: unit.module_name.clone(),
            entry_point: entry.name.clone(),
            fragments: entry.fragments.clone(),
            lines: entry.lines.clone(),
            reached: None,
            outcome: Outcome::SyntaxFail,
            message: None,
            line: None,
            stdout: None,
            stderr: None,
            elapsed_ms: None,
            error: None,
        };

        let outcome = self.run_stages(unit, entry, &mut result);
        debug!(
            entry = result.label().as_str(),
            outcome = %outcome,
            "validated entry point"
        );
        result.outcome = outcome;
        result.reached = outcome.reached();
        if let Some(error) = &result.error {
            result.message = Some(error.to_string());
            result.line = error.line();
        }
        result
    }

    fn run_stages(
        &self,
        unit: &SynthesisUnit,
        entry: &EntryPoint,
        result: &mut ValidationResult,
    ) -> Outcome {
        // Parse
        let tree = match python::parse(&entry.script) {
            Ok(tree) => tree,
            Err(e) => {
                result.error = Some(syntax_error(&e, &entry.line_map));
                return Outcome::SyntaxFail;
            }
        };

        // Lint
        let report = python::analyze(&tree);
        let unresolved = report.unresolved.first().map(|first| {
            let source = entry.line_map.nearest(first.line);
            let hint = source.and_then(|s| self.binding_hint(unit, &first.name, s.fragment));
            StageError::UnresolvedName {
                name: first.name.clone(),
                line: source.map(|s| s.line),
                hint,
            }
        });
        let forward = entry.forward_reads.first().map(|read| forward_read_error(unit, read));
        let earliest = unresolved
            .into_iter()
            .chain(forward)
            .min_by_key(|e| e.line().unwrap_or(usize::MAX));
        if let Some(error) = earliest {
            result.error = Some(error);
            return Outcome::LintFail;
        }

        if !self.execute.enabled {
            return Outcome::LintPass;
        }

        // Execute
        if let Some(reason) = self.capability_gap(entry) {
            info!(entry = %format!("{}::{}", unit.source_path, entry.name), reason = reason.as_str(), "skipping execution");
            result.error = Some(StageError::CapabilityGap { reason });
            return Outcome::ExecSkipped;
        }
        match self.execute_entry(unit, entry) {
            Ok(output) => {
                result.stdout = Some(truncate(&output.stdout, self.execute.max_output));
                result.stderr = Some(truncate(&output.stderr, self.execute.max_output));
                result.elapsed_ms = Some(output.elapsed.as_millis() as u64);
                if output.success {
                    Outcome::ExecPass
                } else {
                    result.error = Some(self.execution_error(&output, &entry.line_map));
                    Outcome::ExecFail
                }
            }
            Err(e) => {
                warn!(entry = %format!("{}::{}", unit.source_path, entry.name), error = %e, "execution could not start");
                result.error = Some(e);
                Outcome::ExecFail
            }
        }
    }

    /// Isolated mode explains which earlier fragment binds a missing name.
    fn binding_hint(&self, unit: &SynthesisUnit, name: &str, fragment: usize) -> Option<String> {
        if unit.mode != SynthMode::Isolated {
            return None;
        }
        let binding = unit.dependency(name, fragment)?;
        Some(format!(
            "bound by fragment {} at {}:{}; fragments do not share state in isolated mode",
            binding.bound_by + 1,
            unit.source_path,
            binding.bound_at
        ))
    }

    fn capability_gap(&self, entry: &EntryPoint) -> Option<String> {
        let env = self.environment();
        if self.credentials.primary.is_none() {
            return Some(format!("{} is not set", env.primary_var));
        }
        if entry.needs_elevated && self.credentials.elevated.is_none() {
            return Some(format!("needs elevated credential; {} is not set", env.elevated_var));
        }
        None
    }

    fn execute_entry(&self, unit: &SynthesisUnit, entry: &EntryPoint) -> Result<ExecOutput, StageError> {
        let fixtures = self
            .fixtures
            .as_ref()
            .ok_or_else(|| StageError::Io("fixtures were not provisioned".to_string()))?;
        let workspace = fixtures.workspace()?;
        let script = workspace
            .path()
            .join(format!("{}_{}.py", unit.module_name, entry.name));
        fs::write(&script, &entry.script)?;

        let started = Instant::now();
        let output = self.sandbox.run(&script, workspace.path(), entry.reads_stdin).map_err(|e| StageError::Execution {
            message: format!("cannot start `{}`: {}", self.sandbox.interpreter(), e),
            line: None,
        })?;
        debug!(
            script = %script.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            code = ?output.code,
            "interpreter finished"
        );
        Ok(output)
    }

    fn execution_error(&self, output: &ExecOutput, map: &LineMap) -> StageError {
        if output.timed_out {
            return StageError::Timeout {
                secs: self.execute.timeout_secs,
            };
        }
        // Innermost frame that belongs to the generated script.
        let line = self
            .traceback
            .captures_iter(&output.stderr)
            .filter(|c| c[1].ends_with(".py") && !c[1].contains("site-packages") && !c[1].starts_with('<'))
            .filter_map(|c| c[2].parse::<usize>().ok())
            .filter_map(|generated| map.lookup(generated))
            .last()
            .map(|s| s.line);
        let message = output
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| match output.code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            });
        StageError::Execution { message, line }
    }

    // -----------------------------------------------------------------------
    // Documents and corpora
    // -----------------------------------------------------------------------

    pub fn validate_unit(&self, unit: &SynthesisUnit) -> Vec<ValidationResult> {
        unit.entry_points
            .iter()
            .map(|entry| self.validate_entry(unit, entry))
            .collect()
    }

    /// Validate a document, or only its `block`-th runnable fragment.
    pub fn validate_document(&self, doc: &Document, block: Option<usize>) -> Vec<ValidationResult> {
        let unit = match block {
            Some(b) => self.synthesizer.synthesize_block(doc, b),
            None => self.synthesizer.synthesize(doc),
        };
        unit.map(|u| self.validate_unit(&u)).unwrap_or_default()
    }

    /// Run arbitrary candidate text through the same transform and stages.
    pub fn validate_text(&self, name: &str, text: &str) -> Option<ValidationResult> {
        let doc = Document::candidate(name, text);
        self.validate_document(&doc, None).into_iter().next()
    }

    /// Validate every selected document. `jobs > 1` runs entry points on a
    /// dedicated rayon pool; results keep corpus order either way.
    pub fn validate_corpus(&self, corpus: &Corpus, selection: &Selection, jobs: usize) -> RunReport {
        let units: Vec<SynthesisUnit> = corpus
            .select(selection)
            .collect::<Vec<_>>()
            .par_iter()
            .filter_map(|doc| match selection.block {
                Some(b) => self.synthesizer.synthesize_block(doc, b),
                None => self.synthesizer.synthesize(doc),
            })
            .collect();
        let work: Vec<(&SynthesisUnit, &EntryPoint)> = units
            .iter()
            .flat_map(|u| u.entry_points.iter().map(move |e| (u, e)))
            .collect();
        info!(
            units = units.len(),
            entry_points = work.len(),
            jobs,
            mode = %self.mode(),
            "validating corpus"
        );

        let results = if jobs > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
                Ok(pool) => pool.install(|| {
                    work.par_iter()
                        .map(|(u, e)| self.validate_entry(u, e))
                        .collect()
                }),
                Err(e) => {
                    warn!(error = %e, "cannot build worker pool; validating sequentially");
                    self.validate_sequential(&work)
                }
            }
        } else {
            self.validate_sequential(&work)
        };

        RunReport::new(self.mode(), corpus, selection, results)
    }

    fn validate_sequential(&self, work: &[(&SynthesisUnit, &EntryPoint)]) -> Vec<ValidationResult> {
        work.iter().map(|(u, e)| self.validate_entry(u, e)).collect()
    }
}

/// Page fragments run in document order, so a name bound by a later
/// fragment is unbound when an earlier one reads it.
fn forward_read_error(unit: &SynthesisUnit, read: &ForwardRead) -> StageError {
    let hint = if read.shadows {
        format!(
            "rebound by fragment {} at {}:{}, which makes it local to the whole page",
            read.bound_by + 1,
            unit.source_path,
            read.bound_at
        )
    } else {
        format!(
            "bound later by fragment {} at {}:{}; page fragments run in document order",
            read.bound_by + 1,
            unit.source_path,
            read.bound_at
        )
    };
    StageError::UnresolvedName {
        name: read.name.clone(),
        line: Some(read.line),
        hint: Some(hint),
    }
}

fn syntax_error(error: &ParseError, map: &LineMap) -> StageError {
    match error {
        ParseError::Syntax(issues) => {
            let first = issues.first();
            StageError::Syntax {
                message: first
                    .map(|i| i.message.clone())
                    .unwrap_or_else(|| "invalid syntax".to_string()),
                line: first.and_then(|i| map.nearest(i.line)).map(|s| s.line),
            }
        }
        ParseError::Grammar(message) => StageError::Syntax {
            message: message.clone(),
            line: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snippets::config::{SynthConfig, TransformConfig};
    use snippets::Pipeline;

    fn validator(mode: SynthMode) -> Validator {
        let pipeline = Pipeline::new(&TransformConfig::default(), &EnvironmentConfig::default()).unwrap();
        let synthesizer = Synthesizer::new(&SynthConfig::default(), pipeline).with_mode(mode);
        let execute = ExecuteConfig {
            enabled: false,
            ..ExecuteConfig::default()
        };
        Validator::new(synthesizer, execute, Credentials::default()).unwrap()
    }

    #[test]
    fn clean_text_passes_lint() {
        let result = validator(SynthMode::Page)
            .validate_text("candidate", "import json\nprint(json.dumps({'a': 1}))\n")
            .unwrap();
        assert_eq!(result.outcome, Outcome::LintPass);
        assert_eq!(result.reached, Some(crate::outcome::Stage::Linted));
        assert!(result.message.is_none());
    }

    #[test]
    fn syntax_error_maps_to_candidate_line() {
        let result = validator(SynthMode::Page)
            .validate_text("candidate", "x = 1\ny = (2,\nprint(x)\n")
            .unwrap();
        assert_eq!(result.outcome, Outcome::SyntaxFail);
        assert_eq!(result.reached, None);
        let line = result.line.unwrap();
        assert!((1..=4).contains(&line), "line {}", line);
    }

    #[test]
    fn undefined_name_is_a_lint_failure() {
        let result = validator(SynthMode::Page)
            .validate_text("candidate", "\nprint(missing_value)\n")
            .unwrap();
        assert_eq!(result.outcome, Outcome::LintFail);
        assert_eq!(result.message.as_deref(), Some("`missing_value` undefined"));
        assert_eq!(result.line, Some(2));
    }

    #[test]
    fn missing_primary_credential_skips() {
        let pipeline = Pipeline::new(&TransformConfig::default(), &EnvironmentConfig::default()).unwrap();
        let synthesizer = Synthesizer::new(&SynthConfig::default(), pipeline);
        let v = Validator::new(synthesizer, ExecuteConfig::default(), Credentials::default()).unwrap();
        let result = v.validate_text("candidate", "print(1)\n").unwrap();
        assert_eq!(result.outcome, Outcome::ExecSkipped);
        assert!(result.message.unwrap().contains("DOCS_SANDBOX_API_TOKEN"));
    }
}
