//! Assembles a document's runnable fragments into a Python module.
//!
//! Page mode wraps every runnable fragment of a document in one `page()`
//! function so later fragments see the names earlier ones bind. Isolated
//! mode gives each fragment its own `block_<n>()` function and its own
//! standalone script, so a fragment that relies on an earlier one fails on
//! its own.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SynthConfig;
use crate::document::{Document, Fragment};
use crate::error::CorpusError;
use crate::python;
use crate::python::NameReport;
use crate::python::strings::{continuation_lines, strip_comment};
use crate::transform::{
    BASE_URL_SYMBOL, CredentialKind, Pipeline, TransformContext, Transformed, merge_imports,
};

/// First line of every generated module.
pub const GENERATED_HEADER: &str = "# Generated from ";

const BANNER_RULE: usize = 70;
const INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthMode {
    /// One entry point per document; fragments share a scope.
    #[default]
    Page,
    /// One entry point per fragment; nothing is shared.
    Isolated,
}

impl fmt::Display for SynthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthMode::Page => write!(f, "page"),
            SynthMode::Isolated => write!(f, "isolated"),
        }
    }
}

impl FromStr for SynthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "page" => Ok(SynthMode::Page),
            "isolated" => Ok(SynthMode::Isolated),
            other => Err(format!("unknown synthesis mode `{}` (expected page or isolated)", other)),
        }
    }
}

/// Where a generated line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine {
    /// Fragment ordinal within the document.
    pub fragment: usize,
    /// 1-based document line.
    pub line: usize,
}

/// Generated line → document line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    lines: Vec<Option<SourceLine>>,
}

impl LineMap {
    /// Look up a 1-based generated line.
    pub fn lookup(&self, generated: usize) -> Option<SourceLine> {
        generated
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .copied()
            .flatten()
    }

    /// The mapped line at or after `generated`, for positions that fall on
    /// banner or preamble lines.
    pub fn nearest(&self, generated: usize) -> Option<SourceLine> {
        let start = generated.saturating_sub(1);
        self.lines
            .iter()
            .skip(start)
            .find_map(|l| *l)
            .or_else(|| self.lines[..start.min(self.lines.len())].iter().rev().find_map(|l| *l))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A name one fragment reads that an earlier fragment binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyBinding {
    pub name: String,
    /// Ordinal of the binding fragment.
    pub bound_by: usize,
    /// Document line of the binding fragment's first code line.
    pub bound_at: usize,
    /// Ordinal of the reading fragment.
    pub used_by: usize,
}

/// A page-mode read that runs before the fragment binding the name.
///
/// The later binding makes the name local to the whole `page()` function,
/// so the read fails at run time even when the name also exists at module
/// level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardRead {
    pub name: String,
    /// Ordinal of the reading fragment.
    pub used_by: usize,
    /// Document line of the read.
    pub line: usize,
    /// Ordinal of the first fragment that binds the name afterwards.
    pub bound_by: usize,
    /// Document line of that fragment's first code line.
    pub bound_at: usize,
    /// The name is also bound at module level (an import, auto-import or
    /// substitution symbol) and the later binding shadows it.
    pub shadows: bool,
}

/// Name analysis of one transformed fragment.
#[derive(Debug, Clone, Default)]
pub struct FragmentNames {
    /// The fragment as transformed, imports included.
    pub code: NameReport,
    /// What stays inside the generated function once imports are hoisted.
    pub body: NameReport,
    /// Document line of each body line.
    pub lines: Vec<usize>,
}

impl FragmentNames {
    fn document_line(&self, body_line: usize) -> usize {
        body_line
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .or_else(|| self.lines.first())
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct Binding {
    name: String,
    fragment: usize,
    line: usize,
}

#[derive(Debug)]
struct PendingRead {
    name: String,
    fragment: usize,
    line: usize,
}

/// Accumulates top-level bindings in document order.
#[derive(Debug, Default)]
pub struct PageScope {
    module: BTreeSet<String>,
    bound: Vec<Binding>,
    /// Names bound inside the page function so far.
    locals: BTreeSet<String>,
    pending: Vec<PendingRead>,
    dependencies: Vec<DependencyBinding>,
    forward_reads: Vec<ForwardRead>,
}

impl PageScope {
    /// `module` holds the names bound outside the page function.
    pub fn new(module: impl IntoIterator<Item = String>) -> Self {
        PageScope {
            module: module.into_iter().collect(),
            ..PageScope::default()
        }
    }

    /// Record one fragment: its reads are checked against everything bound
    /// so far, then its own bindings join the scope. A binding of a name
    /// that an earlier fragment read unbound turns that read into a
    /// [`ForwardRead`].
    pub fn observe(&mut self, fragment: &Fragment, names: &FragmentNames) {
        for read in &names.code.unresolved {
            if let Some(by) = self.bound_by(&read.name) {
                let bound_at = self.bound[by].line;
                let bound_by = self.bound[by].fragment;
                self.dependencies.push(DependencyBinding {
                    name: read.name.clone(),
                    bound_by,
                    bound_at,
                    used_by: fragment.ordinal,
                });
            }
        }

        for read in names.body.unresolved.iter().filter(|r| !r.deferred) {
            if !self.locals.contains(&read.name) {
                self.pending.push(PendingRead {
                    name: read.name.clone(),
                    fragment: fragment.ordinal,
                    line: names.document_line(read.line),
                });
            }
        }
        let first = fragment.first_code_line();
        for name in &names.body.top_level_bindings {
            if !self.locals.insert(name.clone()) {
                continue;
            }
            let (early, rest): (Vec<PendingRead>, Vec<PendingRead>) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|p| p.name == *name && p.fragment != fragment.ordinal);
            self.pending = rest;
            for read in early {
                self.forward_reads.push(ForwardRead {
                    shadows: self.module.contains(name),
                    name: read.name,
                    used_by: read.fragment,
                    line: read.line,
                    bound_by: fragment.ordinal,
                    bound_at: first,
                });
            }
        }

        for name in &names.code.top_level_bindings {
            if self.bound_by(name).is_none() {
                self.bound.push(Binding {
                    name: name.clone(),
                    fragment: fragment.ordinal,
                    line: first,
                });
            }
        }
    }

    /// Index of the first binding of `name` recorded so far.
    fn bound_by(&self, name: &str) -> Option<usize> {
        self.bound.iter().position(|b| b.name == name)
    }

    /// Dependencies, and forward reads ordered by document line.
    pub fn finish(self) -> (Vec<DependencyBinding>, Vec<ForwardRead>) {
        let mut forward = self.forward_reads;
        forward.sort_by_key(|f| (f.line, f.bound_by));
        (self.dependencies, forward)
    }
}

/// An independently invocable function of a unit.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    /// `block_<n>` or `page`.
    pub name: String,
    /// 1-based position among the unit's entry points.
    pub index: usize,
    /// Ordinals of the fragments it runs.
    pub fragments: Vec<usize>,
    /// First code line of each of those fragments.
    pub lines: Vec<usize>,
    pub needs_elevated: bool,
    /// Whether the sandbox should feed canned responses on stdin.
    pub reads_stdin: bool,
    /// Reads that run before their binding fragment; page mode only.
    pub forward_reads: Vec<ForwardRead>,
    /// Preamble, this entry point and an invocation guard.
    pub script: String,
    pub line_map: LineMap,
}

/// The generated module for one document.
#[derive(Debug, Clone)]
pub struct SynthesisUnit {
    pub module_name: String,
    pub source_path: String,
    pub mode: SynthMode,
    pub text: String,
    pub entry_points: Vec<EntryPoint>,
    pub line_map: LineMap,
    pub dependencies: Vec<DependencyBinding>,
}

impl SynthesisUnit {
    /// The binding fragment for `name` as read by fragment `used_by`.
    pub fn dependency(&self, name: &str, used_by: usize) -> Option<&DependencyBinding> {
        self.dependencies
            .iter()
            .find(|d| d.name == name && d.used_by == used_by)
    }
}

struct Prepared<'d> {
    fragment: &'d Fragment,
    transformed: Transformed,
    credential: CredentialKind,
    names: FragmentNames,
    auto_imports: Vec<String>,
}

impl Prepared<'_> {
    fn imports(&self) -> Vec<String> {
        let mut all = self.transformed.imports.clone();
        all.extend(self.auto_imports.iter().cloned());
        all
    }
}

#[derive(Debug, Clone)]
pub struct Synthesizer {
    mode: SynthMode,
    auto_imports: Vec<String>,
    pipeline: Pipeline,
}

impl Synthesizer {
    pub fn new(config: &SynthConfig, pipeline: Pipeline) -> Self {
        Synthesizer {
            mode: config.mode,
            auto_imports: config.auto_imports.clone(),
            pipeline,
        }
    }

    pub fn with_mode(mut self, mode: SynthMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> SynthMode {
        self.mode
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Build the unit for a document, or `None` when nothing in it is
    /// runnable.
    pub fn synthesize(&self, doc: &Document) -> Option<SynthesisUnit> {
        let fragments: Vec<&Fragment> = doc.runnable().collect();
        self.build(doc, &fragments, None)
    }

    /// Build a unit that exercises only the `block`-th (1-based) runnable
    /// fragment. Page mode keeps the fragments before it, since the block
    /// may depend on them.
    pub fn synthesize_block(&self, doc: &Document, block: usize) -> Option<SynthesisUnit> {
        let runnable: Vec<&Fragment> = doc.runnable().collect();
        if block == 0 || block > runnable.len() {
            return None;
        }
        match self.mode {
            SynthMode::Page => self.build(doc, &runnable[..block], None),
            SynthMode::Isolated => self.build(doc, &runnable, Some(block)),
        }
    }

    fn prepare<'d>(&self, doc: &Document, fragment: &'d Fragment) -> Prepared<'d> {
        let credential = self.pipeline.credential_kind(&doc.path, &fragment.code);
        let transformed = self
            .pipeline
            .apply(&fragment.code, &TransformContext { credential });
        let names = fragment_names(fragment, &transformed);
        let auto_imports = names
            .code
            .unresolved
            .iter()
            .filter(|u| self.auto_imports.contains(&u.name))
            .map(|u| format!("import {}", u.name))
            .collect();
        Prepared {
            fragment,
            transformed,
            credential,
            names,
            auto_imports,
        }
    }

    fn build(
        &self,
        doc: &Document,
        fragments: &[&Fragment],
        only: Option<usize>,
    ) -> Option<SynthesisUnit> {
        if fragments.is_empty() {
            return None;
        }
        let prepared: Vec<Prepared<'_>> = fragments.iter().map(|f| self.prepare(doc, f)).collect();

        let all_imports: Vec<Vec<String>> = prepared.iter().map(|p| p.imports()).collect();
        let module_imports = merge_imports(
            std::iter::once(["import os".to_string()].as_slice())
                .chain(all_imports.iter().map(|v| v.as_slice())),
        );

        let mut scope = PageScope::new(self.module_names(&module_imports));
        for p in &prepared {
            scope.observe(p.fragment, &p.names);
        }
        let (dependencies, forward_reads) = scope.finish();

        let total = prepared.len();
        let module_name = module_name(&doc.path);

        let mut module = Emitter::default();
        self.preamble(&mut module, &doc.path, &module_imports);

        let mut entry_points = Vec::new();
        match self.mode {
            SynthMode::Page => {
                let mut body = Emitter::default();
                emit_function(&mut body, "page", &prepared, 1, total, &doc.path);
                module.append(&body);
                emit_main(&mut module, &["page".to_string()]);

                entry_points.push(EntryPoint {
                    name: "page".to_string(),
                    index: 1,
                    fragments: prepared.iter().map(|p| p.fragment.ordinal).collect(),
                    lines: prepared.iter().map(|p| p.fragment.first_code_line()).collect(),
                    needs_elevated: prepared.iter().any(|p| p.credential == CredentialKind::Elevated),
                    reads_stdin: prepared.iter().any(|p| reads_stdin(p)),
                    forward_reads,
                    script: module.text.clone(),
                    line_map: module.map(),
                });
            }
            SynthMode::Isolated => {
                let mut names = Vec::new();
                for (i, p) in prepared.iter().enumerate() {
                    let index = i + 1;
                    let name = format!("block_{}", index);
                    let mut body = Emitter::default();
                    emit_function(&mut body, &name, std::slice::from_ref(p), index, total, &doc.path);
                    module.append(&body);
                    names.push(name.clone());

                    if only.is_some_and(|b| b != index) {
                        continue;
                    }

                    let own_imports = merge_imports([["import os".to_string()].as_slice(), all_imports[i].as_slice()]);
                    let mut script = Emitter::default();
                    self.preamble(&mut script, &doc.path, &own_imports);
                    script.append(&body);
                    emit_guard(&mut script, &name);

                    entry_points.push(EntryPoint {
                        name,
                        index,
                        fragments: vec![p.fragment.ordinal],
                        lines: vec![p.fragment.first_code_line()],
                        needs_elevated: p.credential == CredentialKind::Elevated,
                        reads_stdin: reads_stdin(p),
                        forward_reads: Vec::new(),
                        script: script.text.clone(),
                        line_map: script.map(),
                    });
                }
                emit_main(&mut module, &names);
            }
        }

        debug!(
            document = doc.path.as_str(),
            module = module_name.as_str(),
            mode = %self.mode,
            entry_points = entry_points.len(),
            dependencies = dependencies.len(),
            "synthesized unit"
        );

        Some(SynthesisUnit {
            module_name,
            source_path: doc.path.clone(),
            mode: self.mode,
            line_map: module.map(),
            text: module.text,
            entry_points,
            dependencies,
        })
    }

    /// Names the preamble binds at module level.
    fn module_names(&self, imports: &[String]) -> Vec<String> {
        let mut names = python::parse(&imports.join("\n"))
            .map(|tree| python::analyze(&tree).top_level_bindings)
            .unwrap_or_default();
        names.push(BASE_URL_SYMBOL.to_string());
        names.extend(self.pipeline.placeholders().iter().map(|p| p.symbol.clone()));
        names
    }

    fn preamble(&self, out: &mut Emitter, path: &str, imports: &[String]) {
        let env = self.pipeline.environment();
        out.line(format!("{}{}", GENERATED_HEADER, path), None);
        out.line("# Do not edit: regenerate with `docsnip extract`", None);
        out.blank();
        for import in imports {
            out.line(import.clone(), None);
        }
        out.blank();
        out.line(
            format!(
                "{} = os.environ.get({}, {})",
                BASE_URL_SYMBOL,
                py_str(&env.base_url_var),
                py_str(&env.sandbox_base_url)
            ),
            None,
        );
        for p in self.pipeline.placeholders() {
            out.line(
                format!("{} = os.environ.get({}, {})", p.symbol, py_str(&p.env), py_str(&p.literal)),
                None,
            );
        }
    }
}

fn fragment_names(fragment: &Fragment, transformed: &Transformed) -> FragmentNames {
    let analyze = |text: &str| {
        python::parse(text)
            .map(|tree| python::analyze(&tree))
            .unwrap_or_default()
    };
    let first = fragment.first_code_line();
    FragmentNames {
        code: analyze(&transformed.code),
        body: analyze(&transformed.body()),
        lines: transformed
            .lines
            .iter()
            .map(|l| first + l.origin.unwrap_or(0))
            .collect(),
    }
}

fn reads_stdin(p: &Prepared<'_>) -> bool {
    let code = &p.transformed.code;
    code.contains("input(") || code.contains("stdin")
}

/// A double-quoted Python string literal.
fn py_str(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Generated text with a source mapping per line.
#[derive(Debug, Default, Clone)]
struct Emitter {
    text: String,
    lines: Vec<Option<SourceLine>>,
}

impl Emitter {
    fn line(&mut self, text: impl AsRef<str>, source: Option<SourceLine>) {
        self.text.push_str(text.as_ref());
        self.text.push('\n');
        self.lines.push(source);
    }

    fn blank(&mut self) {
        self.line("", None);
    }

    fn append(&mut self, other: &Emitter) {
        self.text.push_str(&other.text);
        self.lines.extend(other.lines.iter().copied());
    }

    fn map(&self) -> LineMap {
        LineMap {
            lines: self.lines.clone(),
        }
    }
}

fn banner_title(index: usize, total: usize, path: &str, line: usize) -> String {
    format!("# Block {}/{} ({}:{})", index, total, path, line)
}

/// `first` is the 1-based block number of the first fragment, `total` the
/// number of blocks in the unit.
fn emit_function(
    out: &mut Emitter,
    name: &str,
    prepared: &[Prepared<'_>],
    first: usize,
    total: usize,
    path: &str,
) {
    out.blank();
    out.blank();
    out.line(format!("def {}():", name), None);
    for (i, p) in prepared.iter().enumerate() {
        if i > 0 {
            out.blank();
        }
        emit_fragment(out, p, first + i, total, path);
    }
}

fn emit_fragment(out: &mut Emitter, p: &Prepared<'_>, index: usize, total: usize, path: &str) {
    let fragment = p.fragment;
    let first = fragment.first_code_line();
    let rule = format!("{}# {}", INDENT, "=".repeat(BANNER_RULE));
    out.line(&rule, None);
    out.line(format!("{}{}", INDENT, banner_title(index, total, path, first)), None);
    out.line(&rule, None);

    let lines = &p.transformed.lines;
    let continuation = continuation_lines(&p.transformed.body());
    let has_code = |i: usize| !lines[i].text.trim().is_empty();
    let start = (0..lines.len()).find(|&i| has_code(i));
    let end = (0..lines.len()).rev().find(|&i| has_code(i));

    let mut wrote_statement = false;
    if let (Some(start), Some(end)) = (start, end) {
        for i in start..=end {
            let line = &lines[i];
            let source = Some(SourceLine {
                fragment: fragment.ordinal,
                line: first + line.origin.unwrap_or(0),
            });
            let inside_string = continuation.get(i).copied().unwrap_or(false);
            if inside_string {
                out.line(&line.text, source);
            } else if line.text.trim().is_empty() {
                out.line("", source);
            } else {
                out.line(format!("{}{}", INDENT, line.text), source);
                if !strip_comment(&line.text).trim().is_empty() {
                    wrote_statement = true;
                }
            }
        }
    }
    if !wrote_statement {
        out.line(format!("{}pass", INDENT), Some(SourceLine { fragment: fragment.ordinal, line: first }));
    }
}

fn emit_main(out: &mut Emitter, entry_points: &[String]) {
    out.blank();
    out.blank();
    out.line("def main():", None);
    for name in entry_points {
        out.line(format!("{}{}()", INDENT, name), None);
    }
    out.blank();
    out.blank();
    out.line("if __name__ == \"__main__\":", None);
    out.line(format!("{}main()", INDENT), None);
}

fn emit_guard(out: &mut Emitter, entry_point: &str) {
    out.blank();
    out.blank();
    out.line("if __name__ == \"__main__\":", None);
    out.line(format!("{}{}()", INDENT, entry_point), None);
}

/// Deterministic module name for a document path:
/// `guides/quick-start.mdx` → `guides_quick_start`.
pub fn module_name(path: &str) -> String {
    let stem = match path.rfind('.') {
        Some(dot) if dot > path.rfind('/').map(|s| s + 1).unwrap_or(0) => &path[..dot],
        _ => path,
    };
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// What [`write_units`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Materialize units as `<module_name>.py` files under `out_dir`.
///
/// Files whose content already matches are left untouched. With `prune`,
/// generated modules that no longer correspond to a unit are deleted;
/// hand-written files (no generated header) are never touched.
pub fn write_units(
    out_dir: &Path,
    units: &[SynthesisUnit],
    prune: bool,
) -> Result<WriteSummary, CorpusError> {
    fs::create_dir_all(out_dir).map_err(|e| CorpusError::io(out_dir, e))?;
    let init = out_dir.join("__init__.py");
    if !init.exists() {
        fs::write(&init, "").map_err(|e| CorpusError::io(&init, e))?;
    }

    let mut summary = WriteSummary::default();
    let mut names = BTreeSet::new();
    for unit in units {
        if !names.insert(unit.module_name.clone()) {
            warn!(
                module = unit.module_name.as_str(),
                document = unit.source_path.as_str(),
                "module name collision; later document overwrites earlier"
            );
        }
        let path = out_dir.join(format!("{}.py", unit.module_name));
        match fs::read_to_string(&path) {
            Ok(existing) if existing == unit.text => summary.unchanged += 1,
            _ => {
                fs::write(&path, &unit.text).map_err(|e| CorpusError::io(&path, e))?;
                summary.written += 1;
            }
        }
    }

    if prune {
        let entries = fs::read_dir(out_dir).map_err(|e| CorpusError::io(out_dir, e))?;
        let mut stale = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorpusError::io(out_dir, e))?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("py") || names.contains(stem) {
                continue;
            }
            let generated = fs::read_to_string(&path)
                .map(|text| text.starts_with(GENERATED_HEADER))
                .unwrap_or(false);
            if generated {
                stale.push(path);
            }
        }
        stale.sort();
        for path in stale {
            fs::remove_file(&path).map_err(|e| CorpusError::io(&path, e))?;
            summary.removed += 1;
        }
    }

    info!(
        dir = %out_dir.display(),
        written = summary.written,
        unchanged = summary.unchanged,
        removed = summary.removed,
        "wrote generated modules"
    );
    Ok(summary)
}
