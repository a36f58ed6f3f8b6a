//! Source rewrites applied to runnable fragments before synthesis.
//!
//! Rules run in a fixed order: credentials, base URL, placeholder
//! identifiers, import hoisting. Every rule only edits string literals or
//! whole import lines, so the line structure of a fragment is preserved
//! apart from the lines it explicitly adds or hoists.

use std::ops::Range;

use regex::Regex;
use tracing::trace;

use crate::config::{EnvironmentConfig, Placeholder, TransformConfig};
use crate::error::CorpusError;
use crate::python;
use crate::python::strings::{StringLiteral, continuation_lines, string_literals, strip_comment};

/// Symbol the generated module binds to the configurable base URL.
pub const BASE_URL_SYMBOL: &str = "_DOCS_BASE_URL";

/// Which credential a fragment needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Primary,
    Elevated,
}

#[derive(Debug, Clone, Copy)]
pub struct TransformContext {
    pub credential: CredentialKind,
}

/// One line of a transformed fragment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLine {
    pub text: String,
    /// 0-based line in the original fragment; `None` for inserted lines.
    pub origin: Option<usize>,
}

/// A fragment after all rules ran.
#[derive(Debug, Clone, Default)]
pub struct Transformed {
    /// Rewritten code with its imports still in place.
    pub code: String,
    /// Normalized top-level import statements removed from the body.
    pub imports: Vec<String>,
    pub lines: Vec<BodyLine>,
}

impl Transformed {
    pub fn body(&self) -> String {
        let mut body = String::new();
        for line in &self.lines {
            body.push_str(&line.text);
            body.push('\n');
        }
        body
    }
}

/// The ordered rule set, built once per run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    host: String,
    tokens: Vec<String>,
    credential_patterns: Vec<Regex>,
    legacy_call: Option<Regex>,
    legacy_names: Vec<String>,
    key_variables: Vec<String>,
    key_assignment: Option<Regex>,
    elevated_documents: Vec<String>,
    elevated_paths: Vec<String>,
    placeholders: Vec<Placeholder>,
    env: EnvironmentConfig,
}

impl Pipeline {
    pub fn new(config: &TransformConfig, env: &EnvironmentConfig) -> Result<Self, CorpusError> {
        let credential_patterns = config
            .credential_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| CorpusError::pattern(p, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let legacy_call = if config.legacy_env_names.is_empty() {
            None
        } else {
            let names = alternation(&config.legacy_env_names);
            let pattern = format!(r#"os\.(?:getenv|environ\.get)\(\s*(?:"(?:{names})"|'(?:{names})')\s*\)"#);
            Some(Regex::new(&pattern).map_err(|e| CorpusError::pattern(pattern.clone(), e))?)
        };

        let key_assignment = if config.key_variables.is_empty() {
            None
        } else {
            let pattern = format!(r"^\s*(?:{})\s*(?::[^=]*)?=\s*$", alternation(&config.key_variables));
            Some(Regex::new(&pattern).map_err(|e| CorpusError::pattern(pattern.clone(), e))?)
        };

        Ok(Pipeline {
            host: config.production_host.trim_end_matches('/').to_string(),
            tokens: config.placeholder_tokens.clone(),
            credential_patterns,
            legacy_call,
            legacy_names: config.legacy_env_names.clone(),
            key_variables: config.key_variables.clone(),
            key_assignment,
            elevated_documents: config.elevated_documents.clone(),
            elevated_paths: config.elevated_paths.clone(),
            placeholders: config.placeholders.clone(),
            env: env.clone(),
        })
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.env
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Elevated when the document is listed or the code targets one of the
    /// elevated API paths.
    pub fn credential_kind(&self, document: &str, code: &str) -> CredentialKind {
        let listed = self.elevated_documents.iter().any(|d| d == document);
        let targets = self.elevated_paths.iter().any(|p| code.contains(p.as_str()));
        if listed || targets {
            CredentialKind::Elevated
        } else {
            CredentialKind::Primary
        }
    }

    fn credential_var(&self, kind: CredentialKind) -> &str {
        match kind {
            CredentialKind::Primary => &self.env.primary_var,
            CredentialKind::Elevated => &self.env.elevated_var,
        }
    }

    /// Run every rule over one fragment.
    pub fn apply(&self, code: &str, ctx: &TransformContext) -> Transformed {
        let (rewritten, prepended) = self.rewrite(code, ctx);
        let (imports, lines) = split_imports(&rewritten);
        let lines = lines
            .into_iter()
            .map(|(idx, text)| BodyLine {
                text,
                origin: idx.checked_sub(prepended),
            })
            .collect();
        Transformed {
            code: rewritten,
            imports,
            lines,
        }
    }

    /// Rules 1-3. Returns the new code and how many lines were prepended.
    pub fn rewrite(&self, code: &str, ctx: &TransformContext) -> (String, usize) {
        let var = self.credential_var(ctx.credential);
        let mut code = self.replace_credentials(code, var);
        let mut prepended = 0;
        if let Some(line) = self.missing_key_binding(&code, var) {
            code = format!("{}\n{}", line, code);
            prepended = 1;
        }
        let code = self.replace_base_url(&code);
        let code = self.replace_placeholders(&code);
        (code, prepended)
    }

    // -----------------------------------------------------------------------
    // Rule 1: credentials
    // -----------------------------------------------------------------------

    fn replace_credentials(&self, code: &str, var: &str) -> String {
        let code = match &self.legacy_call {
            Some(re) => re
                .replace_all(code, format!(r#"os.environ["{}"]"#, var).as_str())
                .into_owned(),
            None => code.to_string(),
        };

        let mut edits = Vec::new();
        for lit in string_literals(&code) {
            if !lit.terminated || lit.is_bytes() {
                continue;
            }
            let body = lit.body(&code);
            let whole = format!(r#"os.environ["{}"]"#, var);

            if self.is_key_assignment(&code, &lit) {
                edits.push((lit.start..lit.end, whole));
                continue;
            }
            if self.legacy_names.iter().any(|n| n == body) && reads_environment(&code, &lit) {
                edits.push((lit.body.clone(), var.to_string()));
                continue;
            }

            let mut found: Vec<Range<usize>> = Vec::new();
            for token in &self.tokens {
                for (at, _) in body.match_indices(token.as_str()) {
                    if is_word_boundary(body, at, at + token.len()) {
                        found.push(at..at + token.len());
                    }
                }
            }
            for re in &self.credential_patterns {
                found.extend(re.find_iter(body).map(|m| m.range()));
            }
            if found.is_empty() {
                continue;
            }
            found.sort_by_key(|r| r.start);
            found.dedup_by(|b, a| b.start < a.end);

            if found.len() == 1 && found[0] == (0..body.len()) {
                edits.push((lit.start..lit.end, whole));
            } else {
                let inner = other_quote(lit.quote);
                let expr = format!("os.environ[{q}{}{q}]", var, q = inner);
                edits.push((lit.start..lit.end, interpolate(&code, &lit, &found, &expr)));
            }
        }
        apply_edits(&code, edits)
    }

    /// `API_KEY = "..."` with nothing but a comment after the literal.
    fn is_key_assignment(&self, code: &str, lit: &StringLiteral) -> bool {
        let Some(re) = &self.key_assignment else {
            return false;
        };
        let line_start = code[..lit.start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = code[lit.end..].find('\n').map(|i| lit.end + i).unwrap_or(code.len());
        let rest = strip_comment(&code[lit.end..line_end]);
        re.is_match(&code[line_start..lit.start]) && rest.trim().is_empty()
    }

    /// A binding for the key variable when the fragment reads it unbound.
    fn missing_key_binding(&self, code: &str, var: &str) -> Option<String> {
        let tree = python::parse(code).ok()?;
        let report = python::analyze(&tree);
        let name = self.key_variables.iter().find(|k| report.is_unresolved(k))?;
        trace!(name = name.as_str(), "binding key variable");
        Some(format!(r#"{} = os.environ["{}"]"#, name, var))
    }

    // -----------------------------------------------------------------------
    // Rule 2: base URL
    // -----------------------------------------------------------------------

    fn replace_base_url(&self, code: &str) -> String {
        if self.host.is_empty() || !code.contains(self.host.as_str()) {
            return code.to_string();
        }
        let mut edits = Vec::new();
        for lit in string_literals(code) {
            if !lit.terminated || lit.is_bytes() || lit.is_raw() {
                continue;
            }
            let body = lit.body(code);
            let found: Vec<Range<usize>> = body
                .match_indices(self.host.as_str())
                .map(|(at, _)| at..at + self.host.len())
                .filter(|r| ends_host(body, r.end))
                .collect();
            if found.is_empty() {
                continue;
            }
            edits.push((lit.start..lit.end, interpolate(code, &lit, &found, BASE_URL_SYMBOL)));
        }
        apply_edits(code, edits)
    }

    // -----------------------------------------------------------------------
    // Rule 3: placeholder identifiers
    // -----------------------------------------------------------------------

    fn replace_placeholders(&self, code: &str) -> String {
        if self.placeholders.is_empty() {
            return code.to_string();
        }
        let mut edits = Vec::new();
        for lit in string_literals(code) {
            if !lit.terminated || lit.is_bytes() || lit.is_fstring() {
                continue;
            }
            let body = lit.body(code);
            if let Some(p) = self.placeholders.iter().find(|p| p.literal == body) {
                edits.push((lit.start..lit.end, p.symbol.clone()));
            }
        }
        apply_edits(code, edits)
    }
}

// ---------------------------------------------------------------------------
// Rule 4: import hoisting
// ---------------------------------------------------------------------------

/// Remove top-level single-line import statements from `code`.
///
/// Returns the normalized imports in first-seen order (deduplicated) and the
/// remaining lines with their 0-based line index in `code`.
pub fn split_imports(code: &str) -> (Vec<String>, Vec<(usize, String)>) {
    let continuation = continuation_lines(code);
    let mut imports: Vec<String> = Vec::new();
    let mut lines = Vec::new();
    let text = code.strip_suffix('\n').unwrap_or(code);

    for (idx, line) in text.split('\n').enumerate() {
        let inside_string = continuation.get(idx).copied().unwrap_or(false);
        match hoistable_import(line) {
            Some(import) if !inside_string => {
                if !imports.contains(&import) {
                    imports.push(import);
                }
            }
            _ => lines.push((idx, line.to_string())),
        }
    }
    (imports, lines)
}

fn hoistable_import(line: &str) -> Option<String> {
    if !(line.starts_with("import ") || line.starts_with("from ")) {
        return None;
    }
    let statement = strip_comment(line);
    if statement.contains(';') || statement.ends_with('\\') {
        return None;
    }
    if statement.contains('(') && !statement.contains(')') {
        return None;
    }
    if statement.starts_with("from ") && !statement.contains(" import ") {
        return None;
    }
    Some(statement.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Merge import lists, keeping first-seen order with `from __future__`
/// statements first.
pub fn merge_imports<'a>(groups: impl IntoIterator<Item = &'a [String]>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for group in groups {
        for import in group {
            if !merged.contains(import) {
                merged.push(import.clone());
            }
        }
    }
    merged.sort_by_key(|i| !i.starts_with("from __future__"));
    merged
}

// ---------------------------------------------------------------------------
// Literal editing helpers
// ---------------------------------------------------------------------------

fn alternation(names: &[String]) -> String {
    names.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|")
}

fn other_quote(quote: char) -> char {
    if quote == '"' { '\'' } else { '"' }
}

fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let before = text[..start].chars().next_back().is_none_or(|c| !word(c));
    let after = text[end..].chars().next().is_none_or(|c| !word(c));
    before && after
}

/// The host ends where the next character cannot continue a hostname.
fn ends_host(body: &str, end: usize) -> bool {
    body[end..]
        .chars()
        .next()
        .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
}

/// `os.environ.get("API_KEY")`, `os.getenv('API_KEY', ...)`, `environ["API_KEY"]`.
fn reads_environment(code: &str, lit: &StringLiteral) -> bool {
    let before = code[..lit.start].trim_end();
    before.ends_with("getenv(") || before.ends_with("environ.get(") || before.ends_with("environ[")
}

/// Rebuild `lit` as an f-string with each range of its body replaced by
/// `{expr}`. Braces of plain literals are doubled so their value is
/// unchanged.
fn interpolate(code: &str, lit: &StringLiteral, ranges: &[Range<usize>], expr: &str) -> String {
    let body = lit.body(code);
    let was_fstring = lit.is_fstring();
    let escape = |s: &str| {
        if was_fstring {
            s.to_string()
        } else {
            s.replace('{', "{{").replace('}', "}}")
        }
    };

    let mut out = String::new();
    let prefix: String = lit
        .prefix
        .chars()
        .filter(|c| !c.eq_ignore_ascii_case(&'u'))
        .collect();
    out.push_str(&prefix);
    if !was_fstring {
        out.push('f');
    }
    let delimiter = lit.delimiter();
    out.push_str(&delimiter);
    let mut cursor = 0;
    for range in ranges {
        out.push_str(&escape(&body[cursor..range.start]));
        out.push('{');
        out.push_str(expr);
        out.push('}');
        cursor = range.end;
    }
    out.push_str(&escape(&body[cursor..]));
    out.push_str(&delimiter);
    out
}

fn apply_edits(code: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    if edits.is_empty() {
        return code.to_string();
    }
    edits.sort_by_key(|(r, _)| std::cmp::Reverse(r.start));
    let mut out = code.to_string();
    for (range, text) in edits {
        out.replace_range(range, &text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        let config = TransformConfig {
            elevated_documents: vec!["admin/tokens.mdx".into()],
            elevated_paths: vec!["/v2/cost_management".into()],
            placeholders: vec![Placeholder {
                literal: "550e8400-e29b-41d4-a716-446655440000".into(),
                symbol: "_DOCS_TEST_FILE_ID".into(),
                env: "DOCS_TEST_FILE_ID".into(),
            }],
            ..TransformConfig::default()
        };
        Pipeline::new(&config, &EnvironmentConfig::default()).unwrap()
    }

    fn rewrite(code: &str) -> String {
        let ctx = TransformContext {
            credential: CredentialKind::Primary,
        };
        pipeline().rewrite(code, &ctx).0
    }

    #[test]
    fn bearer_placeholder() {
        assert_eq!(
            rewrite("headers = {\"Authorization\": \"Bearer YOUR_API_KEY\"}\n"),
            "headers = {\"Authorization\": f\"Bearer {os.environ['DOCS_SANDBOX_API_TOKEN']}\"}\n"
        );
        assert_eq!(
            rewrite("h = f\"Bearer YOUR_EDEN_AI_API_KEY\"\n"),
            "h = f\"Bearer {os.environ['DOCS_SANDBOX_API_TOKEN']}\"\n"
        );
    }

    #[test]
    fn bare_token_and_credential_literal() {
        assert_eq!(
            rewrite("client = Client(api_key=\"sk-abc123\")\n"),
            "client = Client(api_key=os.environ[\"DOCS_SANDBOX_API_TOKEN\"])\n"
        );
        assert_eq!(
            rewrite("key = 'YOUR_API_KEY'\n"),
            "key = os.environ[\"DOCS_SANDBOX_API_TOKEN\"]\n"
        );
    }

    #[test]
    fn legacy_environment_reads() {
        assert_eq!(
            rewrite("key = os.getenv(\"EDEN_AI_API_KEY\")\n"),
            "key = os.environ[\"DOCS_SANDBOX_API_TOKEN\"]\n"
        );
        assert_eq!(
            rewrite("key = os.environ[\"API_KEY\"]\n"),
            "key = os.environ[\"DOCS_SANDBOX_API_TOKEN\"]\n"
        );
    }

    #[test]
    fn key_variable_assignment_and_prepend() {
        assert_eq!(
            rewrite("API_KEY = \"eyJhbGciOi\"  # paste yours\nprint(API_KEY)\n"),
            "API_KEY = os.environ[\"DOCS_SANDBOX_API_TOKEN\"]  # paste yours\nprint(API_KEY)\n"
        );
        let ctx = TransformContext {
            credential: CredentialKind::Primary,
        };
        let (code, prepended) = pipeline().rewrite("call(API_KEY)\n", &ctx);
        assert_eq!(prepended, 1);
        assert!(code.starts_with("API_KEY = os.environ[\"DOCS_SANDBOX_API_TOKEN\"]\ncall(API_KEY)"));
    }

    #[test]
    fn elevated_credential() {
        let p = pipeline();
        assert_eq!(p.credential_kind("admin/tokens.mdx", ""), CredentialKind::Elevated);
        assert_eq!(
            p.credential_kind("guide.mdx", "url = BASE + '/v2/cost_management/'"),
            CredentialKind::Elevated
        );
        assert_eq!(p.credential_kind("guide.mdx", "x = 1"), CredentialKind::Primary);
        let ctx = TransformContext {
            credential: CredentialKind::Elevated,
        };
        let (code, _) = p.rewrite("k = \"YOUR_API_KEY\"\n", &ctx);
        assert_eq!(code, "k = os.environ[\"DOCS_PRODUCTION_API_TOKEN\"]\n");
    }

    #[test]
    fn base_url_in_plain_and_fstrings() {
        assert_eq!(
            rewrite("url = \"https://api.example.com/v3/x?a={b}\"\n"),
            "url = f\"{_DOCS_BASE_URL}/v3/x?a={{b}}\"\n"
        );
        assert_eq!(
            rewrite("url = f\"https://api.example.com/v3/{name}\"\n"),
            "url = f\"{_DOCS_BASE_URL}/v3/{name}\"\n"
        );
        assert_eq!(
            rewrite("u = \"https://api.example.com.evil/\"\n"),
            "u = \"https://api.example.com.evil/\"\n"
        );
        assert_eq!(rewrite("u = r\"https://api.example.com\"\n"), "u = r\"https://api.example.com\"\n");
    }

    #[test]
    fn placeholder_identifier() {
        assert_eq!(
            rewrite("file_id = \"550e8400-e29b-41d4-a716-446655440000\"\n"),
            "file_id = _DOCS_TEST_FILE_ID\n"
        );
    }

    #[test]
    fn rules_are_idempotent() {
        let src = "import requests\nurl = \"https://api.example.com/v3/llm\"\nh = {\"Authorization\": \"Bearer YOUR_API_KEY\"}\nrequests.post(url, headers=h)\n";
        let once = rewrite(src);
        assert_eq!(rewrite(&once), once);
    }

    #[test]
    fn rules_are_noops_without_patterns() {
        let src = "x = {\"a\": 1}\nprint(f\"{x}\")\n";
        assert_eq!(rewrite(src), src);
    }

    #[test]
    fn hoists_top_level_imports() {
        let (imports, lines) = split_imports(
            "import os\nfrom  json import dumps  # x\n\ndef f():\n    import time\nimport os\nx = 1\n",
        );
        assert_eq!(imports, vec!["import os", "from json import dumps"]);
        let kept: Vec<usize> = lines.iter().map(|(i, _)| *i).collect();
        assert_eq!(kept, vec![2, 3, 4, 6]);
    }

    #[test]
    fn multiline_imports_and_strings_stay() {
        let (imports, lines) = split_imports("from x import (\n    a,\n)\ns = \"\"\"\nimport y\n\"\"\"\n");
        assert!(imports.is_empty());
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn merge_puts_future_first() {
        let a = vec!["import os".to_string()];
        let b = vec!["from __future__ import annotations".to_string(), "import os".to_string()];
        assert_eq!(
            merge_imports([a.as_slice(), b.as_slice()]),
            vec!["from __future__ import annotations", "import os"]
        );
    }

    #[test]
    fn apply_tracks_origins() {
        let ctx = TransformContext {
            credential: CredentialKind::Primary,
        };
        let out = pipeline().apply("import requests\nrequests.get(API_KEY)\n", &ctx);
        assert_eq!(out.imports, vec!["import requests"]);
        assert_eq!(out.lines[0].origin, None);
        assert_eq!(out.lines[1].origin, Some(1));
        assert_eq!(out.lines[1].text, "requests.get(API_KEY)");
    }
}
