use crate::ranges::{compress_ranges, line_span, LineSet};
use serde::{Deserialize, Serialize};

/// Segment naming the catch-all chunk of a file.
pub const BASE_SEGMENT: &str = "BASE";

/// Id of the BASE chunk of `path`.
#[must_use]
pub fn base_id(path: &str) -> String {
    format!("{path}:{BASE_SEGMENT}")
}

/// A raw, unvalidated line-range proposal from a chunk producer.
///
/// Lines are 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProposal {
    /// Full chunk id: `path:dot.joined.call.path`
    pub id: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl ChunkProposal {
    #[must_use]
    pub fn new(id: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            id: id.into(),
            start_line,
            end_line,
        }
    }

    /// Lines covered by this proposal
    #[must_use]
    pub fn lines(&self) -> LineSet {
        line_span(self.start_line, self.end_line)
    }

    /// Get the number of lines in this proposal
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Dotted segment after the `path:` prefix
    #[must_use]
    pub fn local_name(&self) -> &str {
        local_name(&self.id)
    }
}

/// Dotted suffix of a chunk id (`"a.py:A.B"` -> `"A.B"`).
#[must_use]
pub fn local_name(id: &str) -> &str {
    id.rsplit_once(':').map_or(id, |(_, name)| name)
}

/// Path prefix of a chunk id (`"a.py:A.B"` -> `"a.py"`).
#[must_use]
pub fn file_of(id: &str) -> &str {
    id.rsplit_once(':').map_or(id, |(path, _)| path)
}

/// One entry of a resolved file partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedChunk {
    pub id: String,
    /// `path:ranges` locator of the lines this chunk owns
    #[serde(rename = "ref")]
    pub reference: String,
    /// Lines owned by this chunk (empty for a header-only identity)
    #[serde(skip)]
    pub lines: LineSet,
}

impl ResolvedChunk {
    #[must_use]
    pub fn new(id: String, path: &str, lines: LineSet) -> Self {
        let reference = if lines.is_empty() {
            format!("{path}:0")
        } else {
            format!("{path}:{}", compress_ranges(&lines))
        };
        Self {
            id,
            reference,
            lines,
        }
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        local_name(&self.id) == BASE_SEGMENT
    }
}

/// Which producer generated the proposals for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    SyntaxTree,
    FixedWindow,
    Generated,
}

impl ChunkSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyntaxTree => "syntax_tree",
            Self::FixedWindow => "fixed_window",
            Self::Generated => "generated",
        }
    }
}

/// Resolved partition of one file plus the producer that drove it
#[derive(Debug, Clone)]
pub struct FileChunks {
    pub path: String,
    pub source: ChunkSource,
    pub chunks: Vec<ResolvedChunk>,
}

/// Estimate tokens from content (rough heuristic: 4 chars per token for code)
#[must_use]
pub fn estimate_tokens(content: &str) -> usize {
    (content.len() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_line_count() {
        let proposal = ChunkProposal::new("a.rs:foo", 10, 15);
        assert_eq!(proposal.line_count(), 6);
        assert_eq!(proposal.lines().len(), 6);
        assert_eq!(proposal.local_name(), "foo");
    }

    #[test]
    fn test_id_helpers() {
        assert_eq!(local_name("src/a.py:A.B"), "A.B");
        assert_eq!(file_of("src/a.py:A.B"), "src/a.py");
        assert_eq!(base_id("src/a.py"), "src/a.py:BASE");
    }

    #[test]
    fn test_empty_chunk_points_at_header() {
        let chunk = ResolvedChunk::new("a.py:A".to_string(), "a.py", LineSet::new());
        assert_eq!(chunk.reference, "a.py:0");
        assert!(!chunk.is_base());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
