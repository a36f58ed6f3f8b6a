//! Exclusion-marker detection.
//!
//! A fragment is illustrative when a marker line sits within
//! [`MARKER_LOOKBACK`] lines above its opening fence, or above the
//! `<CodeGroup>` that wraps it. This is a local, order-independent check.

use regex::Regex;

use crate::document::Classification;
use crate::error::CorpusError;

/// How many lines above a fence (or group opening) are searched.
pub const MARKER_LOOKBACK: usize = 3;

/// Matches `{/* skip-test */}` (MDX) and `<!-- skip-test -->` (Markdown).
pub const DEFAULT_MARKER: &str = r"\{/\*\s*skip-test\s*\*/\}|<!--\s*skip-test\s*-->";

#[derive(Debug, Clone)]
pub struct Classifier {
    marker: Regex,
}

impl Classifier {
    /// Build a classifier from a marker pattern. The pattern must match the
    /// whole trimmed line.
    pub fn new(pattern: &str) -> Result<Self, CorpusError> {
        let anchored = format!("^(?:{})$", pattern);
        let marker = Regex::new(&anchored).map_err(|e| CorpusError::pattern(pattern, e))?;
        Ok(Classifier { marker })
    }

    pub fn is_marker(&self, line: &str) -> bool {
        self.marker.is_match(line.trim())
    }

    /// True when any of the last [`MARKER_LOOKBACK`] lines of `preceding`
    /// is a marker line.
    pub fn has_exclusion_marker(&self, preceding: &[&str]) -> bool {
        let start = preceding.len().saturating_sub(MARKER_LOOKBACK);
        preceding[start..].iter().any(|line| self.is_marker(line))
    }

    /// Classify the fence opening at `fence_idx` (0-based line index).
    /// `group_open_idx` is the line of the enclosing `<CodeGroup>`, if any.
    pub fn classify(
        &self,
        lines: &[&str],
        fence_idx: usize,
        group_open_idx: Option<usize>,
    ) -> Classification {
        let before_fence = &lines[..fence_idx.min(lines.len())];
        if self.has_exclusion_marker(before_fence) {
            return Classification::Illustrative;
        }
        if let Some(group_idx) = group_open_idx {
            let before_group = &lines[..group_idx.min(lines.len())];
            if self.has_exclusion_marker(before_group) {
                return Classification::Illustrative;
            }
        }
        Classification::Runnable
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::new(DEFAULT_MARKER).expect("default marker pattern is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_forms() {
        let c = Classifier::default();
        assert!(c.is_marker("{/* skip-test */}"));
        assert!(c.is_marker("  {/*skip-test*/}  "));
        assert!(c.is_marker("<!-- skip-test -->"));
        assert!(!c.is_marker("see {/* skip-test */} below"));
        assert!(!c.is_marker("skip-test"));
    }

    #[test]
    fn lookback_is_three_lines() {
        let c = Classifier::default();
        let lines = ["{/* skip-test */}", "a", "b", "c", "```python"];
        assert_eq!(c.classify(&lines, 4, None), Classification::Runnable);

        let lines = ["{/* skip-test */}", "a", "b", "```python"];
        assert_eq!(c.classify(&lines, 3, None), Classification::Illustrative);
    }

    #[test]
    fn marker_before_group_applies_to_panels() {
        let c = Classifier::default();
        let lines = [
            "{/* skip-test */}",
            "<CodeGroup>",
            "```bash",
            "curl x",
            "```",
            "",
            "```python Python",
        ];
        assert_eq!(c.classify(&lines, 6, None), Classification::Runnable);
        assert_eq!(c.classify(&lines, 6, Some(1)), Classification::Illustrative);
    }

    #[test]
    fn custom_marker() {
        let c = Classifier::new(r"<!--\s*no-run\s*-->").unwrap();
        assert!(c.has_exclusion_marker(&["<!-- no-run -->"]));
        assert!(!c.has_exclusion_marker(&["{/* skip-test */}"]));
    }
}
