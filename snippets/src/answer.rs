//! Code blocks in free-form Markdown, such as an answer returned by a
//! documentation Q&A service. Answers are plain CommonMark, so unlike the
//! corpus they go through pulldown-cmark.

use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser as CmarkParser, Tag, TagEnd};

use crate::config::CorpusConfig;
use crate::document::Document;

/// One fenced block taken from an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerBlock {
    /// 0-based among the extracted blocks.
    pub index: usize,
    pub code: String,
    /// 1-based line of the opening fence.
    pub line: usize,
}

impl AnswerBlock {
    /// Wrap the block as a one-fragment document for the normal pipeline.
    pub fn to_document(&self, answer_name: &str) -> Document {
        let mut doc = Document::candidate(format!("{}#{}", answer_name, self.index + 1), self.code.clone());
        for fragment in &mut doc.fragments {
            fragment.start_line = self.line;
        }
        doc
    }
}

/// Every fenced block whose language is one of `languages`, in order.
pub fn extract_blocks(markdown: &str, languages: &[String]) -> Vec<AnswerBlock> {
    let parser = CmarkParser::new_ext(markdown, Options::empty());
    let events: Vec<(Event<'_>, Range<usize>)> = parser.into_offset_iter().collect();

    let mut blocks = Vec::new();
    let mut i = 0;
    while i < events.len() {
        let (ref event, ref span) = events[i];
        i += 1;
        let Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) = event else {
            continue;
        };
        let language = info
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        let code = collect_text_until(&events, &mut i, |e| matches!(e, TagEnd::CodeBlock));
        if languages.iter().any(|l| l.eq_ignore_ascii_case(&language)) {
            blocks.push(AnswerBlock {
                index: blocks.len(),
                code,
                line: markdown[..span.start].matches('\n').count() + 1,
            });
        }
    }
    blocks
}

/// Python blocks with the default `[corpus] languages` tags.
pub fn extract_python_blocks(markdown: &str) -> Vec<AnswerBlock> {
    extract_blocks(markdown, &CorpusConfig::default().languages)
}

fn collect_text_until(
    events: &[(Event<'_>, Range<usize>)],
    i: &mut usize,
    is_end: impl Fn(&TagEnd) -> bool,
) -> String {
    let mut text = String::new();
    while *i < events.len() {
        let (ref ev, _) = events[*i];
        *i += 1;
        match ev {
            Event::End(tag_end) if is_end(tag_end) => break,
            Event::Text(s) => text.push_str(s),
            _ => {}
        }
    }
    text
}
