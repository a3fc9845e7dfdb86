//! Line sets, compressed range strings and `path[:ranges]` refs.

use crate::error::{ChunkerError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Set of 1-indexed line numbers.
pub type LineSet = BTreeSet<usize>;

/// Collapse a line set into a minimal comma-joined run-length string,
/// e.g. `{3,4,5,9,12,13,14}` -> `"3-5,9,12-14"`.
#[must_use]
pub fn compress_ranges(lines: &LineSet) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = lines.iter().copied();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut prev) = (first, first);
    for line in iter {
        if line == prev + 1 {
            prev = line;
            continue;
        }
        parts.push(format_run(start, prev));
        start = line;
        prev = line;
    }
    parts.push(format_run(start, prev));
    parts.join(",")
}

fn format_run(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// Parse a compressed range string back into a line set.
///
/// The empty string parses to the empty set.
pub fn parse_ranges(raw: &str) -> Result<LineSet> {
    let mut lines = LineSet::new();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(lines);
    }

    for part in raw.split(',') {
        let part = part.trim();
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (parse_line(a, raw)?, parse_line(b, raw)?),
            None => {
                let line = parse_line(part, raw)?;
                (line, line)
            }
        };
        if start > end {
            return Err(ChunkerError::InvalidRanges(format!(
                "descending run {start}-{end} in '{raw}'"
            )));
        }
        lines.extend(start..=end);
    }

    Ok(lines)
}

fn parse_line(raw: &str, whole: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ChunkerError::InvalidRanges(format!("'{raw}' in '{whole}'")))
}

/// Whether `raw` looks like a range expression (digits, `-` and `,` only).
#[must_use]
pub fn is_range_expr(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == ',')
        && raw.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Inclusive line range set for `start..=end`.
#[must_use]
pub fn line_span(start: usize, end: usize) -> LineSet {
    (start..=end).collect()
}

/// A resolvable locator: a path plus an optional set of lines.
///
/// `lines == None` means "all lines of the target".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    pub path: String,
    pub lines: Option<LineSet>,
}

impl ChunkRef {
    #[must_use]
    pub fn whole(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: None,
        }
    }

    #[must_use]
    pub fn with_lines(path: impl Into<String>, lines: LineSet) -> Self {
        Self {
            path: path.into(),
            lines: Some(lines),
        }
    }

    /// Parse `path[:ranges]`. A trailing segment that is not a range
    /// expression is treated as part of the path; an empty trailing segment
    /// (`path:`) means all lines.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.rsplit_once(':') {
            Some((path, "")) => Ok(Self::whole(path)),
            Some((path, tail)) if is_range_expr(tail) => {
                Ok(Self::with_lines(path, parse_ranges(tail)?))
            }
            _ => Ok(Self::whole(raw)),
        }
    }

    /// Resolve the line set against a target with `line_count` lines.
    #[must_use]
    pub fn resolve_lines(&self, line_count: usize) -> LineSet {
        match &self.lines {
            Some(lines) => lines
                .iter()
                .copied()
                .filter(|line| (1..=line_count).contains(line))
                .collect(),
            None => line_span(1, line_count),
        }
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lines {
            Some(lines) => write!(f, "{}:{}", self.path, compress_ranges(lines)),
            None => f.write_str(&self.path),
        }
    }
}

/// Number of lines in `text` as the ref grammar counts them.
#[must_use]
pub fn count_lines(text: &str) -> usize {
    text.lines().count()
}

/// Extract the text of `lines` from `text` (1-indexed), joined by newlines.
#[must_use]
pub fn slice_lines(text: &str, lines: &LineSet) -> String {
    let mut out = Vec::with_capacity(lines.len());
    for (idx, line) in text.lines().enumerate() {
        if lines.contains(&(idx + 1)) {
            out.push(line);
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compress_collapses_runs() {
        let lines: LineSet = [3, 4, 5, 9, 12, 13, 14].into_iter().collect();
        assert_eq!(compress_ranges(&lines), "3-5,9,12-14");
        assert_eq!(compress_ranges(&LineSet::new()), "");
    }

    #[test]
    fn parse_accepts_compressed_form() {
        let lines = parse_ranges("3-5,9,12-14").unwrap();
        assert_eq!(lines.len(), 7);
        assert!(lines.contains(&9));
        assert!(!lines.contains(&10));
        assert!(parse_ranges("5-3").is_err());
        assert!(parse_ranges("a-b").is_err());
    }

    #[test]
    fn ref_parse_distinguishes_ranges_from_ids() {
        let r = ChunkRef::parse("src/a.py:1-4,16-20").unwrap();
        assert_eq!(r.path, "src/a.py");
        assert_eq!(r.lines.as_ref().map(LineSet::len), Some(9));

        let r = ChunkRef::parse("src/a.py:Class.method").unwrap();
        assert_eq!(r.path, "src/a.py:Class.method");
        assert!(r.lines.is_none());

        let r = ChunkRef::parse("src/a.py:").unwrap();
        assert_eq!(r, ChunkRef::whole("src/a.py"));
        assert_eq!(r.resolve_lines(3), line_span(1, 3));
    }

    #[test]
    fn slice_lines_keeps_order() {
        let text = "a\nb\nc\nd";
        let lines: LineSet = [1, 3].into_iter().collect();
        assert_eq!(slice_lines(text, &lines), "a\nc");
    }
}
