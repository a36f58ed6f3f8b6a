//! Line scanner for fenced code regions.
//!
//! MDX pages mix Markdown with JSX elements such as `<CodeGroup>`, which a
//! CommonMark parser folds into raw HTML blocks together with the fences they
//! wrap. Scanning lines keeps every fence visible and lets an unterminated
//! fence be reported instead of silently swallowing the rest of the page.

use tracing::debug;

use crate::classify::Classifier;
use crate::document::{Classification, Document, Fragment, GroupTag};
use crate::error::StructuralError;

const GROUP_OPEN: &str = "<CodeGroup";
const GROUP_CLOSE: &str = "</CodeGroup>";

/// Options that decide which fences are fragments.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Accepted language tags, lowercased.
    pub languages: Vec<String>,
    pub classifier: Classifier,
}

impl ScanOptions {
    pub fn new(languages: &[String], classifier: Classifier) -> Self {
        ScanOptions {
            languages: languages.iter().map(|l| l.to_lowercase()).collect(),
            classifier,
        }
    }

    fn is_target(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions::new(
            &["python".to_string(), "py".to_string(), "python3".to_string()],
            Classifier::default(),
        )
    }
}

/// An opening fence line.
#[derive(Debug, Clone, PartialEq)]
struct FenceOpen {
    marker: char,
    width: usize,
    indent: usize,
    language: Option<String>,
    label: Option<String>,
}

struct OpenFence {
    fence: FenceOpen,
    line_idx: usize,
}

struct OpenGroup {
    index: usize,
    line_idx: usize,
    selected: bool,
}

/// Scan one document for target-language fragments.
pub fn scan_document(
    path: &str,
    source: &str,
    options: &ScanOptions,
) -> Result<Document, StructuralError> {
    let lines: Vec<&str> = source
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let offsets = line_offsets(source);

    let mut fragments = Vec::new();
    let mut open: Option<OpenFence> = None;
    let mut group: Option<OpenGroup> = None;
    let mut groups_seen = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        if let Some(current) = &open {
            if !closes(line, &current.fence) {
                continue;
            }
            let fence = &current.fence;
            let start_idx = current.line_idx;
            let is_target = fence
                .language
                .as_deref()
                .is_some_and(|lang| options.is_target(lang));

            if is_target {
                let code = collect_code(&lines[start_idx + 1..idx], fence.indent);
                let mut classification = options.classifier.classify(
                    &lines,
                    start_idx,
                    group.as_ref().map(|g| g.line_idx),
                );
                let group_tag = group.as_mut().map(|g| {
                    if classification == Classification::Runnable {
                        if g.selected {
                            classification = Classification::Alternate;
                        } else {
                            g.selected = true;
                        }
                    }
                    GroupTag {
                        group: g.index,
                        label: fence.label.clone(),
                    }
                });
                let span_end = offsets[idx] + line.len();
                fragments.push(Fragment {
                    document: path.to_string(),
                    ordinal: fragments.len(),
                    code,
                    language: fence.language.clone().unwrap_or_default(),
                    start_line: start_idx + 1,
                    end_line: idx + 1,
                    span: offsets[start_idx]..span_end,
                    group_tag,
                    classification,
                });
            }
            open = None;
            continue;
        }

        if let Some(fence) = parse_fence_open(line) {
            open = Some(OpenFence {
                fence,
                line_idx: idx,
            });
            continue;
        }

        let trimmed = line.trim();
        if trimmed.starts_with(GROUP_CLOSE) {
            if group.take().is_none() {
                debug!(document = path, line = idx + 1, "stray </CodeGroup>");
            }
        } else if trimmed.starts_with(GROUP_OPEN) && !trimmed.contains(GROUP_CLOSE) {
            if let Some(outer) = &group {
                return Err(StructuralError::new(
                    path,
                    "nested <CodeGroup>",
                    idx + 1,
                    offsets[idx]..offsets[idx] + line.len(),
                )
                .with_note(format!("enclosing group opened on line {}", outer.line_idx + 1)));
            }
            group = Some(OpenGroup {
                index: groups_seen,
                line_idx: idx,
                selected: false,
            });
            groups_seen += 1;
        }
    }

    if let Some(current) = open {
        let idx = current.line_idx;
        let fence: String = std::iter::repeat_n(current.fence.marker, current.fence.width).collect();
        return Err(StructuralError::new(
            path,
            "unterminated code fence",
            idx + 1,
            offsets[idx]..offsets[idx] + lines[idx].len(),
        )
        .with_note(format!("expected a closing `{}` before the end of the file", fence)));
    }

    if let Some(g) = group {
        let idx = g.line_idx;
        return Err(StructuralError::new(
            path,
            "unclosed <CodeGroup>",
            idx + 1,
            offsets[idx]..offsets[idx] + lines[idx].len(),
        ));
    }

    debug!(document = path, fragments = fragments.len(), "scanned");

    Ok(Document {
        path: path.to_string(),
        source: source.to_string(),
        fragments,
    })
}

/// Byte offset of the start of every line.
fn line_offsets(source: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    offsets.extend(source.match_indices('\n').map(|(i, _)| i + 1));
    offsets
}

/// Recognize an opening fence: three or more backticks or tildes, then an
/// optional info string (`python Label`).
fn parse_fence_open(line: &str) -> Option<FenceOpen> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let width = trimmed.chars().take_while(|&c| c == marker).count();
    if width < 3 {
        return None;
    }
    let info = trimmed[width..].trim();
    // Backtick fences cannot carry backticks in their info string.
    if marker == '`' && info.contains('`') {
        return None;
    }

    let mut words = info.splitn(2, char::is_whitespace);
    let language = words
        .next()
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_start_matches('{').trim_end_matches('}').to_lowercase());
    let label = words
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    Some(FenceOpen {
        marker,
        width,
        indent,
        language,
        label,
    })
}

fn closes(line: &str, fence: &FenceOpen) -> bool {
    let trimmed = line.trim();
    let width = trimmed.chars().take_while(|&c| c == fence.marker).count();
    width >= fence.width && width == trimmed.chars().count()
}

/// Join code lines, stripping up to `indent` leading spaces from each.
fn collect_code(lines: &[&str], indent: usize) -> String {
    let mut code = String::new();
    for line in lines {
        let strip = line
            .bytes()
            .take(indent)
            .take_while(|&b| b == b' ')
            .count();
        code.push_str(&line[strip..]);
        code.push('\n');
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str) -> Document {
        scan_document("doc.mdx", src, &ScanOptions::default()).expect("scan failed")
    }

    #[test]
    fn fence_open_info_string() {
        let f = parse_fence_open("```python Python").unwrap();
        assert_eq!(f.language.as_deref(), Some("python"));
        assert_eq!(f.label.as_deref(), Some("Python"));
        assert_eq!(f.width, 3);

        let f = parse_fence_open("  ~~~~").unwrap();
        assert_eq!(f.language, None);
        assert_eq!(f.indent, 2);

        assert!(parse_fence_open("``python").is_none());
        assert!(parse_fence_open("``` a`b").is_none());
    }

    #[test]
    fn only_python_fences_are_fragments() {
        let doc = scan("# T\n\n```bash\nexport X=1\n```\n\n```python\nprint(1)\n```\n\n```\nplain\n```\n");
        assert_eq!(doc.fragments.len(), 1);
        let f = &doc.fragments[0];
        assert_eq!(f.code, "print(1)\n");
        assert_eq!(f.start_line, 7);
        assert_eq!(f.end_line, 9);
        assert_eq!(f.first_code_line(), 8);
    }

    #[test]
    fn python_inside_other_fence_is_not_a_fence() {
        let doc = scan("````markdown\n```python\nprint(1)\n```\n````\n");
        assert!(doc.fragments.is_empty());
    }

    #[test]
    fn closing_fence_may_be_indented() {
        let doc = scan("```python\nx = 1\n   ```\n");
        assert_eq!(doc.fragments.len(), 1);
        assert_eq!(doc.fragments[0].code, "x = 1\n");
    }

    #[test]
    fn indented_fence_content_is_dedented() {
        let doc = scan("1. Step\n   ```python\n   if x:\n       y()\n   ```\n");
        assert_eq!(doc.fragments[0].code, "if x:\n    y()\n");
    }

    #[test]
    fn unterminated_fence_is_structural() {
        let err = scan_document("doc.mdx", "text\n```python\nprint(1)\n", &ScanOptions::default())
            .unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn unterminated_foreign_fence_is_structural() {
        let err = scan_document("doc.mdx", "```js\nx\n", &ScanOptions::default()).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unclosed_group_is_structural() {
        let err = scan_document("doc.mdx", "<CodeGroup>\n```python\nx\n```\n", &ScanOptions::default())
            .unwrap_err();
        assert!(err.message.contains("CodeGroup"));
    }

    #[test]
    fn group_selects_first_python_panel() {
        let src = "<CodeGroup>\n```python Requests\na = 1\n```\n```bash cURL\ncurl\n```\n```python SDK\nb = 2\n```\n</CodeGroup>\n```python\nc = 3\n```\n";
        let doc = scan(src);
        assert_eq!(doc.fragments.len(), 3);
        assert_eq!(doc.fragments[0].classification, Classification::Runnable);
        assert_eq!(doc.fragments[1].classification, Classification::Alternate);
        assert_eq!(doc.fragments[2].classification, Classification::Runnable);
        let tag = doc.fragments[1].group_tag.as_ref().unwrap();
        assert_eq!(tag.group, 0);
        assert_eq!(tag.label.as_deref(), Some("SDK"));
        assert!(doc.fragments[2].group_tag.is_none());
    }

    #[test]
    fn marker_before_group_excludes_its_python_panel() {
        let src = "{/* skip-test */}\n<CodeGroup>\n```bash\ncurl\n```\n\n\n```python\nx\n```\n</CodeGroup>\n";
        let doc = scan(src);
        assert_eq!(doc.fragments[0].classification, Classification::Illustrative);
    }

    #[test]
    fn illustrative_fragment_is_still_scanned() {
        let src = "{/* skip-test */}\n```python\n\"key\": \"value\"\n```\n";
        let doc = scan(src);
        assert_eq!(doc.fragments.len(), 1);
        assert_eq!(doc.fragments[0].classification, Classification::Illustrative);
        assert_eq!(doc.runnable().count(), 0);
    }

    #[test]
    fn crlf_lines() {
        let doc = scan("```python\r\nx = 1\r\n```\r\n");
        assert_eq!(doc.fragments[0].code, "x = 1\n");
    }
}
