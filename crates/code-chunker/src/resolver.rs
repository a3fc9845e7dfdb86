//! Resolution of raw line-range proposals into a file partition.
//!
//! ```text
//! proposals (possibly nested)          partition
//!   a.py:A      1-20          ──>        a.py:BASE   21-30
//!   a.py:A.f    3-9                      a.py:A      1-2,10-20
//!                                        a.py:A.f    3-9
//! ```
//!
//! Ids are processed longest-first: a child id is always a strict dotted
//! extension of its parent, so every descendant is settled before its
//! ancestor extends over it and then subtracts it.

use crate::error::{ChunkerError, Result};
use crate::ranges::LineSet;
use crate::types::{base_id, local_name, ChunkProposal, ResolvedChunk, BASE_SEGMENT};
use std::collections::{HashMap, HashSet};

/// Check a single proposal against the file it claims to describe.
pub fn validate_proposal(path: &str, line_count: usize, proposal: &ChunkProposal) -> Result<()> {
    let invalid = || ChunkerError::InvalidBoundaries {
        id: proposal.id.clone(),
        start: proposal.start_line,
        end: proposal.end_line,
        line_count,
    };

    let Some(name) = proposal.id.strip_prefix(path).and_then(|s| s.strip_prefix(':')) else {
        return Err(invalid());
    };
    if name.is_empty() || name == BASE_SEGMENT || name.split('.').any(str::is_empty) {
        return Err(invalid());
    }
    if proposal.start_line == 0
        || proposal.start_line > proposal.end_line
        || proposal.end_line > line_count
    {
        return Err(invalid());
    }
    Ok(())
}

/// Drop proposals that cannot take part in resolution.
#[must_use]
pub fn retain_valid(path: &str, line_count: usize, proposals: Vec<ChunkProposal>) -> Vec<ChunkProposal> {
    proposals
        .into_iter()
        .filter(|proposal| match validate_proposal(path, line_count, proposal) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Rejecting chunk proposal: {err}");
                false
            }
        })
        .collect()
}

/// Resolve proposals for `path` (a file of `line_count` lines) into a
/// partition: every line of the file is owned by exactly one output entry,
/// BASE included. BASE is always first; named chunks follow in line order.
///
/// Proposals must already be valid (see [`validate_proposal`]). When two
/// proposals share an id the last one wins.
#[must_use]
pub fn resolve(path: &str, line_count: usize, proposals: &[ChunkProposal]) -> Vec<ResolvedChunk> {
    let mut raw: HashMap<&str, &ChunkProposal> = HashMap::new();
    for proposal in proposals {
        raw.insert(proposal.id.as_str(), proposal);
    }

    let mut ids: Vec<&str> = raw.keys().copied().collect();
    ids.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut owned: HashMap<&str, LineSet> = HashMap::with_capacity(ids.len());
    let mut claimed = LineSet::new();

    for id in ids {
        let proposal = raw[id];
        let prefix = format!("{id}.");
        let descendants_max = owned
            .iter()
            .filter(|(other, _)| other.starts_with(&prefix))
            .filter_map(|(_, lines)| lines.last().copied())
            .max();

        let start = proposal.start_line;
        let end = descendants_max.map_or(proposal.end_line, |max| max.max(proposal.end_line));

        // Descendants were settled first, so subtracting everything claimed so
        // far removes their lines (and any conflicting sibling claims).
        let lines: LineSet = (start..=end).filter(|line| !claimed.contains(line)).collect();
        claimed.extend(lines.iter().copied());
        owned.insert(id, lines);
    }

    let base_lines: LineSet = (1..=line_count).filter(|line| !claimed.contains(line)).collect();

    let mut named: Vec<ResolvedChunk> = owned
        .into_iter()
        .map(|(id, lines)| ResolvedChunk::new(id.to_string(), path, lines))
        .collect();
    named.sort_by(|a, b| {
        let a_first = a.lines.first().copied().unwrap_or(usize::MAX);
        let b_first = b.lines.first().copied().unwrap_or(usize::MAX);
        a_first.cmp(&b_first).then_with(|| a.id.cmp(&b.id))
    });

    let mut out = Vec::with_capacity(named.len() + 1);
    out.push(ResolvedChunk::new(base_id(path), path, base_lines));
    out.extend(named);
    out
}

/// Immediate parent id by dropping the last dotted segment; `None` for
/// top-level chunks.
#[must_use]
pub fn parent_id(id: &str) -> Option<String> {
    let (path, name) = id.rsplit_once(':')?;
    let (parent, _) = name.rsplit_once('.')?;
    Some(format!("{path}:{parent}"))
}

/// Resolve the structural parent of chunk `id`: the nearest ancestor id
/// (walking up the dotted segments) for which `is_known` holds, otherwise the
/// file's BASE chunk. Never fails.
#[must_use]
pub fn parent_of<F>(id: &str, is_known: F) -> String
where
    F: Fn(&str) -> bool,
{
    let (path, name) = id.rsplit_once(':').unwrap_or((id, ""));
    let mut current = name;
    while let Some((parent, _)) = current.rsplit_once('.') {
        let candidate = format!("{path}:{parent}");
        if is_known(&candidate) {
            return candidate;
        }
        current = parent;
    }
    base_id(path)
}

/// [`parent_of`] against a concrete id set.
#[must_use]
pub fn parent_in(id: &str, known: &HashSet<String>) -> String {
    parent_of(id, |candidate| known.contains(candidate))
}

/// Whether `id` is a BASE chunk id
#[must_use]
pub fn is_base_id(id: &str) -> bool {
    local_name(id) == BASE_SEGMENT
}
