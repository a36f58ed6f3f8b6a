use std::fmt;

use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

use super::strings::string_literals;

/// A parsed Python module.
pub struct SyntaxTree {
    source: String,
    tree: Tree,
}

impl SyntaxTree {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

impl fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("root", &self.tree.root_node().to_sexp())
            .finish()
    }
}

/// One syntax problem, positioned in the parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub message: String,
    /// 1-based.
    pub line: usize,
    /// 1-based, in bytes.
    pub column: usize,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.column, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{}", first_message(.0))]
    Syntax(Vec<SyntaxIssue>),
    #[error("python grammar unavailable: {0}")]
    Grammar(String),
}

fn first_message(issues: &[SyntaxIssue]) -> String {
    issues
        .first()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "invalid syntax".to_string())
}

/// Parse `source` without evaluating it.
///
/// Unterminated strings and unbalanced brackets are detected by a direct
/// scan so their messages name the real defect; everything else comes from
/// the tree-sitter error recovery nodes.
pub fn parse(source: &str) -> Result<SyntaxTree, ParseError> {
    let mut issues = lexical_issues(source);
    if issues.is_empty() {
        issues = bracket_issues(source);
    }

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ParseError::Grammar(e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParseError::Grammar("parser returned no tree".to_string()))?;

    if issues.is_empty() {
        collect_tree_issues(tree.root_node(), source, &mut issues);
    }

    if issues.is_empty() {
        Ok(SyntaxTree {
            source: source.to_string(),
            tree,
        })
    } else {
        issues.sort_by_key(|i| (i.line, i.column));
        Err(ParseError::Syntax(issues))
    }
}

fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = offset - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
    (line, column)
}

fn lexical_issues(source: &str) -> Vec<SyntaxIssue> {
    string_literals(source)
        .into_iter()
        .filter(|lit| !lit.terminated)
        .map(|lit| {
            let (line, column) = position(source, lit.start);
            let message = if lit.triple {
                "unterminated triple-quoted string literal"
            } else {
                "unterminated string literal"
            };
            SyntaxIssue {
                message: message.to_string(),
                line,
                column,
            }
        })
        .collect()
}

fn bracket_issues(source: &str) -> Vec<SyntaxIssue> {
    let literals = string_literals(source);
    let mut in_literal = vec![false; source.len()];
    for lit in &literals {
        for flag in &mut in_literal[lit.start..lit.end.min(source.len())] {
            *flag = true;
        }
    }

    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut issues = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if in_literal[i] {
            i += 1;
            continue;
        }
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'(' | b'[' | b'{' => stack.push((bytes[i], i)),
            close @ (b')' | b']' | b'}') => {
                let expected = match close {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, at)) => {
                        let (line, column) = position(source, i);
                        let (open_line, _) = position(source, at);
                        issues.push(SyntaxIssue {
                            message: format!(
                                "closing parenthesis '{}' does not match opening parenthesis '{}' on line {}",
                                close as char, open as char, open_line
                            ),
                            line,
                            column,
                        });
                        return issues;
                    }
                    None => {
                        let (line, column) = position(source, i);
                        issues.push(SyntaxIssue {
                            message: format!("unmatched '{}'", close as char),
                            line,
                            column,
                        });
                        return issues;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some((open, at)) = stack.first() {
        let (line, column) = position(source, *at);
        issues.push(SyntaxIssue {
            message: format!("'{}' was never closed", *open as char),
            line,
            column,
        });
    }
    issues
}

fn collect_tree_issues(node: Node<'_>, source: &str, issues: &mut Vec<SyntaxIssue>) {
    if node.is_missing() {
        let pos = node.start_position();
        issues.push(SyntaxIssue {
            message: format!("expected `{}`", node.kind()),
            line: pos.row + 1,
            column: pos.column + 1,
        });
        return;
    }
    if node.is_error() {
        let pos = node.start_position();
        let text = node.utf8_text(source.as_bytes()).unwrap_or("");
        let snippet: String = text.lines().next().unwrap_or("").chars().take(40).collect();
        issues.push(SyntaxIssue {
            message: format!("invalid syntax near `{}`", snippet.trim()),
            line: pos.row + 1,
            column: pos.column + 1,
        });
        return;
    }
    if is_legacy_statement(node, source) {
        let pos = node.start_position();
        issues.push(SyntaxIssue {
            message: format!(
                "Python 2 `{}` statement; call it as a function",
                node.kind().trim_end_matches("_statement")
            ),
            line: pos.row + 1,
            column: pos.column + 1,
        });
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_tree_issues(child, source, issues);
    }
}

/// `print "x"` / `exec code`, which the grammar accepts for Python 2.
fn is_legacy_statement(node: Node<'_>, source: &str) -> bool {
    if !matches!(node.kind(), "print_statement" | "exec_statement") {
        return false;
    }
    let text = node.utf8_text(source.as_bytes()).unwrap_or("");
    let keyword = node.kind().trim_end_matches("_statement");
    !text[keyword.len().min(text.len())..].trim_start().starts_with('(')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues(src: &str) -> Vec<SyntaxIssue> {
        match parse(src) {
            Err(ParseError::Syntax(issues)) => issues,
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected a syntax error in {:?}", src),
        }
    }

    #[test]
    fn valid_module_parses() {
        let tree = parse("import os\n\ndef f(x):\n    return x + 1\n").unwrap();
        assert_eq!(tree.root().kind(), "module");
    }

    #[test]
    fn unterminated_string() {
        let found = issues("x = 1\ny = \"abc\n");
        assert_eq!(found[0].line, 2);
        assert!(found[0].message.contains("unterminated string"));
    }

    #[test]
    fn unterminated_triple_string() {
        let found = issues("doc = \"\"\"start\nmore\n");
        assert!(found[0].message.contains("triple-quoted"));
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn unbalanced_bracket() {
        let found = issues("requests.post(url,\n    json={\"a\": 1}\n");
        assert_eq!(found[0].message, "'(' was never closed");
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn stray_closer() {
        let found = issues("x = 1)\n");
        assert_eq!(found[0].message, "unmatched ')'");
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        parse("s = \"(\"  # )\nt = ']'\n").unwrap();
    }

    #[test]
    fn bare_dict_entry_is_invalid() {
        let found = issues("\"key\": \"value\",\n\"other\": 1\n");
        assert!(!found.is_empty());
    }

    #[test]
    fn python2_print_is_rejected() {
        let found = issues("print \"hello\"\n");
        assert!(found[0].message.contains("print"));
    }
}
