//! Actionable marker extraction (TODO/FIXME-style annotations).
//!
//! Scans only the added side of a change-set's diff hunks. Deleted lines no
//! longer exist in the working tree and are never scanned.

use crate::core::changes::ChangeSet;
use crate::core::error::RecapError;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub file: String,
    pub line: u64,
    pub text: String,
}

/// Compiled marker matcher for a keyword set.
pub struct MarkerMatcher {
    pattern: Regex,
}

impl MarkerMatcher {
    /// Keywords match as whole-word, case-sensitive tokens, optionally
    /// followed by an owner tag in parentheses and/or punctuation; the
    /// captured text is the trimmed remainder of the line.
    pub fn new(keywords: &[String]) -> Result<Self, RecapError> {
        if keywords.is_empty() {
            return Err(RecapError::ValidationError(
                "marker keyword set must not be empty".to_string(),
            ));
        }
        let alternation = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(
            r"\b(?:{})\b(?:\([^)]*\))?[:.,;!\-]*[ \t]*(.*)$",
            alternation
        ))
        .map_err(|e| RecapError::ValidationError(format!("invalid marker keyword: {}", e)))?;
        Ok(MarkerMatcher { pattern })
    }

    pub fn match_line(&self, line: &str) -> Option<String> {
        self.pattern
            .captures(line)
            .map(|c| c.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default())
    }
}

/// Extract markers from the added lines of every diff in the change-set.
///
/// Output order is file path ascending, then line number ascending,
/// regardless of the ordering of the underlying hunks.
pub fn extract_markers(
    change_set: &ChangeSet,
    keywords: &[String],
) -> Result<Vec<Marker>, RecapError> {
    let matcher = MarkerMatcher::new(keywords)?;
    let mut markers = Vec::new();
    for diff in &change_set.diffs {
        for (line_no, line) in added_lines(&diff.hunks) {
            if let Some(text) = matcher.match_line(line) {
                markers.push(Marker {
                    file: diff.path.clone(),
                    line: line_no,
                    text,
                });
            }
        }
    }
    markers.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
    Ok(markers)
}

/// Walk unified-diff text yielding (new-side line number, content) for each
/// added line. Context lines advance the counter; removed lines do not.
fn added_lines(hunks: &str) -> Vec<(u64, &str)> {
    let mut out = Vec::new();
    let mut new_line: u64 = 0;
    for line in hunks.lines() {
        if let Some(rest) = line.strip_prefix("@@") {
            if let Some(start) = parse_hunk_new_start(rest) {
                new_line = start;
            }
            continue;
        }
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        match line.as_bytes().first() {
            Some(b'+') => {
                out.push((new_line, &line[1..]));
                new_line += 1;
            }
            Some(b'-') => {}
            _ => {
                new_line += 1;
            }
        }
    }
    out
}

/// Parse the `+start[,len]` field out of a `@@ -a,b +c,d @@` header tail.
fn parse_hunk_new_start(rest: &str) -> Option<u64> {
    let plus = rest.find('+')?;
    let tail = &rest[plus + 1..];
    let end = tail
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(tail.len());
    tail[..end].parse().ok()
}
