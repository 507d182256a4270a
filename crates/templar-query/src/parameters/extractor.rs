//! Placeholder scanning
//!
//! Finds placeholder occurrences in template SQL, skipping string literals,
//! quoted identifiers and comments.

use regex::Regex;
use std::sync::LazyLock;

/// A placeholder occurrence kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// `:name`
    Named(String),
    /// `?`, numbered by order of appearance when bound
    Question,
    /// `$n`
    Numbered(usize),
}

/// A placeholder and its byte range in the SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMatch {
    pub start: usize,
    pub end: usize,
    pub placeholder: Placeholder,
}

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":([a-zA-Z_][a-zA-Z0-9_]*)|\$(\d+)|\?").expect("valid regex")
});

// String literals, quoted identifiers and comments are never scanned
static SKIPPED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"]|"")*"|--[^\n]*|/\*[\s\S]*?\*/"#).expect("valid regex")
});

/// Extract every placeholder occurrence in order of appearance.
///
/// Repeated named placeholders appear once per occurrence.
pub fn extract_placeholders(sql: &str) -> Vec<PlaceholderMatch> {
    let skip_ranges: Vec<(usize, usize)> = SKIPPED_REGEX
        .find_iter(sql)
        .map(|m| (m.start(), m.end()))
        .collect();
    let is_skipped = |pos: usize| skip_ranges.iter().any(|(s, e)| pos >= *s && pos < *e);

    let mut matches = Vec::new();
    for cap in PLACEHOLDER_REGEX.captures_iter(sql) {
        let Some(full) = cap.get(0) else { continue };
        if is_skipped(full.start()) {
            continue;
        }

        let placeholder = if let Some(name) = cap.get(1) {
            // `x::text` is a cast
            if full.start() > 0 && sql.as_bytes()[full.start() - 1] == b':' {
                continue;
            }
            Placeholder::Named(name.as_str().to_string())
        } else if let Some(number) = cap.get(2) {
            match number.as_str().parse::<usize>() {
                Ok(n) if n > 0 => Placeholder::Numbered(n),
                _ => continue,
            }
        } else {
            Placeholder::Question
        };

        matches.push(PlaceholderMatch {
            start: full.start(),
            end: full.end(),
            placeholder,
        });
    }
    matches
}
