use std::fmt;
use std::ops::Range;

use serde::Serialize;

/// A prose file from the corpus with the Python fragments found in it.
/// Immutable once scanned.
#[derive(Debug, Clone)]
pub struct Document {
    /// Corpus-relative path, always `/`-separated.
    pub path: String,
    /// Full source text (kept for diagnostics).
    pub source: String,
    /// Target-language fragments in document order.
    pub fragments: Vec<Fragment>,
}

impl Document {
    /// Wrap arbitrary candidate text as a single-fragment document so it can
    /// flow through transform, synthesis and validation like corpus content.
    pub fn candidate(name: impl Into<String>, code: impl Into<String>) -> Self {
        let path = name.into();
        let code = code.into();
        let line_count = code.lines().count();
        let span = 0..code.len();
        Document {
            fragments: vec![Fragment {
                document: path.clone(),
                ordinal: 0,
                code: code.clone(),
                language: "python".to_string(),
                start_line: 0,
                end_line: line_count + 1,
                span,
                group_tag: None,
                classification: Classification::Runnable,
            }],
            path,
            source: code,
        }
    }

    pub fn runnable(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(|f| f.is_runnable())
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.fragments
            .iter()
            .filter(|f| f.classification == classification)
            .count()
    }

    /// Byte range of a 1-based line (without the trailing newline).
    pub fn line_span(&self, line: usize) -> Range<usize> {
        line_span(&self.source, line)
    }
}

/// How the pipeline treats a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Executable example.
    Runnable,
    /// Preceded by an exclusion marker; shown to readers, never executed.
    Illustrative,
    /// A second or later Python panel of the same `<CodeGroup>`.
    Alternate,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Runnable => write!(f, "runnable"),
            Classification::Illustrative => write!(f, "illustrative"),
            Classification::Alternate => write!(f, "alternate"),
        }
    }
}

/// Marks a fragment that sits inside a multi-language `<CodeGroup>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTag {
    /// 0-based index of the group within its document.
    pub group: usize,
    /// Panel label from the fence info string (`python Python` → `Python`).
    pub label: Option<String>,
}

/// One fenced code region in the target language.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Owning document path.
    pub document: String,
    /// 0-based index among the document's target-language fragments.
    pub ordinal: usize,
    /// Code between the fences, fence indentation removed.
    pub code: String,
    /// Declared language tag, lowercased.
    pub language: String,
    /// 1-based line of the opening fence.
    pub start_line: usize,
    /// 1-based line of the closing fence.
    pub end_line: usize,
    /// Byte span of the whole fenced region.
    pub span: Range<usize>,
    pub group_tag: Option<GroupTag>,
    pub classification: Classification,
}

impl Fragment {
    pub fn is_runnable(&self) -> bool {
        self.classification == Classification::Runnable
    }

    /// 1-based document line of the first code line.
    pub fn first_code_line(&self) -> usize {
        self.start_line + 1
    }

    /// Readable identifier: `path:L<line>[<ordinal>]`.
    pub fn id(&self) -> String {
        format!("{}:L{}[{}]", self.document, self.first_code_line(), self.ordinal)
    }
}

pub fn line_span(source: &str, line: usize) -> Range<usize> {
    let mut start = 0;
    for (idx, text) in source.split('\n').enumerate() {
        let end = start + text.len();
        if idx + 1 == line {
            return start..end;
        }
        start = end + 1;
    }
    source.len()..source.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_span_finds_lines() {
        let src = "first\nsecond\nthird";
        assert_eq!(&src[line_span(src, 1)], "first");
        assert_eq!(&src[line_span(src, 2)], "second");
        assert_eq!(&src[line_span(src, 3)], "third");
        assert_eq!(line_span(src, 9), src.len()..src.len());
    }

    #[test]
    fn candidate_is_single_runnable_fragment() {
        let doc = Document::candidate("answer", "print(1)\n");
        assert_eq!(doc.fragments.len(), 1);
        assert!(doc.fragments[0].is_runnable());
        assert_eq!(doc.fragments[0].first_code_line(), 1);
    }
}
