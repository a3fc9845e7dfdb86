//! Unified diff parsing and mapping of hunks onto the graph.

use crate::annotator::{check_cancelled, record_metadata, Annotator, PendingDocuments};
use crate::error::{IndexerError, Result};
use async_trait::async_trait;
use repograph_chunker::{line_span, ChunkRef, LineSet};
use repograph_graph::{ChunkLink, EdgeKind, Node, NodeKind, RepoGraph};
use repograph_store::{checksum, SharedStore};
use std::path::PathBuf;
use std::process::Command;
use tokio_util::sync::CancellationToken;

/// One `@@` hunk of a file diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub file: String,
    /// Post-image line range, 1-indexed and inclusive
    pub new_start: usize,
    pub new_end: usize,
    /// Span of the hunk inside the diff text, header line included
    pub text_start: usize,
    pub text_end: usize,
}

impl DiffHunk {
    #[must_use]
    pub fn post_image(&self) -> LineSet {
        line_span(self.new_start, self.new_end)
    }
}

/// A hunk after it was added to the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedHunk {
    pub id: String,
    pub reference: String,
    pub checksum: String,
    pub text: String,
    /// File and chunk ids the hunk was linked to, file first
    pub linked: Vec<String>,
}

/// Result of mapping one diff onto the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffMapping {
    pub diff_id: String,
    pub diff_checksum: String,
    pub hunks: Vec<MappedHunk>,
    pub skipped_files: Vec<String>,
}

/// Parse `@@ -a[,b] +c[,d] @@` into `(a, b, c, d)`
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = line.strip_prefix("@@ ")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(' ')?;
    let (a, b) = parse_side(old.strip_prefix('-')?)?;
    let (c, d) = parse_side(new.strip_prefix('+')?)?;
    Some((a, b, c, d))
}

fn parse_side(raw: &str) -> Option<(usize, usize)> {
    match raw.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((raw.parse().ok()?, 1)),
    }
}

fn strip_side_prefix(raw: &str) -> &str {
    raw.strip_prefix("b/")
        .or_else(|| raw.strip_prefix("a/"))
        .unwrap_or(raw)
}

fn path_from_git_header(line: &str) -> Option<String> {
    let rest = line.strip_prefix("diff --git ")?;
    let (_, new) = rest.rsplit_once(" b/")?;
    Some(new.to_string())
}

/// Split a unified diff into hunks. Deleted files (`+++ /dev/null`) have no
/// post-image and are dropped.
///
/// Hunk bodies are consumed by the line counts of their `@@` header, so body
/// lines such as `--- x` (a removed `-- x`) are never read as file headers.
pub fn parse_unified_diff(text: &str) -> Result<Vec<DiffHunk>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut hunks: Vec<DiffHunk> = Vec::new();
    let mut file: Option<String> = None;
    let mut open: Option<DiffHunk> = None;
    let mut old_left = 0usize;
    let mut new_left = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if old_left > 0 || new_left > 0 {
            match line.as_bytes().first() {
                Some(b'-') => old_left = old_left.saturating_sub(1),
                Some(b'+') => new_left = new_left.saturating_sub(1),
                // "\ No newline at end of file"
                Some(b'\\') => {}
                _ => {
                    old_left = old_left.saturating_sub(1);
                    new_left = new_left.saturating_sub(1);
                }
            }
            if let Some(hunk) = open.as_mut() {
                hunk.text_end = line_no;
            }
            continue;
        }
        if line.starts_with("diff --git ") {
            hunks.extend(open.take());
            file = path_from_git_header(line);
            continue;
        }
        let next_is_target = lines.get(idx + 1).is_some_and(|next| next.starts_with("+++ "));
        if line.starts_with("--- ") && next_is_target {
            hunks.extend(open.take());
            continue;
        }
        if let Some(target) = line.strip_prefix("+++ ") {
            if open.is_none() {
                let target = target.split('\t').next().unwrap_or(target).trim();
                file = (target != "/dev/null").then(|| strip_side_prefix(target).to_string());
                continue;
            }
        }
        if line.starts_with("@@") {
            hunks.extend(open.take());
            let (_, old_len, new_start, new_len) = parse_hunk_header(line)
                .ok_or_else(|| IndexerError::Diff(format!("bad hunk header at line {line_no}: {line}")))?;
            old_left = old_len;
            new_left = new_len;
            let Some(path) = file.clone() else {
                continue;
            };
            let new_start = new_start.max(1);
            let new_end = if new_len == 0 {
                new_start
            } else {
                new_start + new_len - 1
            };
            open = Some(DiffHunk {
                file: path,
                new_start,
                new_end,
                text_start: line_no,
                text_end: line_no,
            });
            continue;
        }
        if let Some(hunk) = open.as_mut() {
            hunk.text_end = line_no;
        }
    }
    hunks.extend(open);
    Ok(hunks)
}

fn chunk_lines(node: &Node) -> Option<LineSet> {
    ChunkRef::parse(&node.reference).ok()?.lines
}

/// Drop the hunk nodes of a previous mapping of `diff_id`
fn clear_previous(graph: &mut RepoGraph, diff_id: &str) {
    let old: Vec<String> = graph
        .successors(diff_id, Some(EdgeKind::Hierarchy))
        .into_iter()
        .map(|node| node.id.clone())
        .collect();
    for id in old {
        graph.remove_node(&id);
    }
}

/// Add a `diff` node for `diff_text` plus one chunk node per hunk, each linked
/// with `diff` edges to its file and every chunk whose lines intersect the
/// hunk's post-image.
pub fn map_diff(graph: &mut RepoGraph, diff_id: &str, diff_text: &str) -> Result<DiffMapping> {
    let hunks = parse_unified_diff(diff_text)?;
    let text_lines: Vec<&str> = diff_text.lines().collect();
    clear_previous(graph, diff_id);

    let diff_checksum = checksum(diff_text);
    let mut diff_node = Node::diff(diff_id, diff_id, diff_checksum.clone());
    let mut mapping = DiffMapping {
        diff_id: diff_id.to_string(),
        diff_checksum,
        ..Default::default()
    };

    let mut mapped_hunks = Vec::new();
    for hunk in hunks {
        let file_present = graph
            .node(&hunk.file)
            .is_some_and(|node| node.kind == NodeKind::File);
        if !file_present {
            log::warn!("Diff {diff_id}: {} is not in the graph, skipping", hunk.file);
            if !mapping.skipped_files.contains(&hunk.file) {
                mapping.skipped_files.push(hunk.file.clone());
            }
            continue;
        }

        let post_image = hunk.post_image();
        let mut linked = vec![hunk.file.clone()];
        linked.extend(
            graph
                .descendants(&hunk.file, EdgeKind::Hierarchy)
                .into_iter()
                .filter(|node| node.kind == NodeKind::Chunk)
                .filter(|node| {
                    chunk_lines(node).is_some_and(|lines| !lines.is_disjoint(&post_image))
                })
                .map(|node| node.id.clone()),
        );

        let text = text_lines
            .get(hunk.text_start - 1..hunk.text_end)
            .map(|slice| slice.join("\n"))
            .unwrap_or_default();
        mapped_hunks.push(MappedHunk {
            id: format!("{diff_id}:{}:{}-{}", hunk.file, hunk.new_start, hunk.new_end),
            reference: format!("{diff_id}:{}-{}", hunk.text_start, hunk.text_end),
            checksum: checksum(&text),
            text,
            linked,
        });
    }

    diff_node.chunks = mapped_hunks
        .iter()
        .map(|hunk| ChunkLink {
            id: hunk.id.clone(),
            reference: hunk.reference.clone(),
        })
        .collect();
    graph.add_node(diff_node)?;

    for hunk in &mapped_hunks {
        graph.add_node(Node::chunk(&hunk.id, &hunk.reference, &hunk.checksum))?;
        graph.add_edge(diff_id, &hunk.id, EdgeKind::Hierarchy)?;
        for target in &hunk.linked {
            graph.add_edge(&hunk.id, target, EdgeKind::Diff)?;
        }
    }
    log::info!(
        "Mapped diff {diff_id}: {} hunks, {} files skipped",
        mapped_hunks.len(),
        mapping.skipped_files.len()
    );
    mapping.hunks = mapped_hunks;
    Ok(mapping)
}

/// Graph id of the diff node for a git ref
#[must_use]
pub fn diff_node_id(git_ref: &str) -> String {
    format!("diff:{git_ref}")
}

/// Output of `git diff <git_ref>` run in `root`
pub async fn git_diff(root: PathBuf, git_ref: String) -> Result<String> {
    let output = tokio::task::spawn_blocking(move || {
        Command::new("git")
            .arg("diff")
            .arg("--no-color")
            .arg("--no-ext-diff")
            .arg(&git_ref)
            .current_dir(&root)
            .output()
    })
    .await
    .map_err(|e| IndexerError::Git(format!("git task failed: {e}")))??;
    if !output.status.success() {
        return Err(IndexerError::Git(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    String::from_utf8(output.stdout).map_err(|_| IndexerError::Git("diff output is not UTF-8".to_string()))
}

/// Maps `git diff <ref>` onto the graph as a `diff` node with one chunk per
/// hunk.
pub struct DiffAnnotator {
    root: PathBuf,
    git_ref: String,
}

impl DiffAnnotator {
    pub fn new(root: impl Into<PathBuf>, git_ref: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            git_ref: git_ref.into(),
        }
    }

    async fn diff_text(&self) -> Result<String> {
        git_diff(self.root.clone(), self.git_ref.clone()).await
    }

    /// Map an already obtained diff and store its documents
    pub async fn apply(&self, mut graph: RepoGraph, store: &SharedStore, diff_text: &str) -> Result<RepoGraph> {
        let diff_id = diff_node_id(&self.git_ref);
        let mapping = map_diff(&mut graph, &diff_id, diff_text)?;
        let mut pending = PendingDocuments::default();
        pending.push(
            mapping.diff_checksum.clone(),
            diff_text.to_string(),
            record_metadata("diff", &diff_id),
        );
        for hunk in mapping.hunks {
            pending.push(hunk.checksum, hunk.text, record_metadata("chunk", &hunk.id));
        }
        pending.flush(store).await?;
        Ok(graph)
    }
}

#[async_trait]
impl Annotator for DiffAnnotator {
    fn name(&self) -> &'static str {
        "diff"
    }

    async fn is_complete(&self, graph: &RepoGraph, _store: &SharedStore) -> Result<bool> {
        let Some(node) = graph.node(&diff_node_id(&self.git_ref)) else {
            return Ok(false);
        };
        let current = checksum(&self.diff_text().await?);
        Ok(node.checksum.as_deref() == Some(current.as_str()))
    }

    async fn annotate(
        &self,
        graph: RepoGraph,
        store: &SharedStore,
        _refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<RepoGraph> {
        let text = self.diff_text().await?;
        check_cancelled(cancel)?;
        self.apply(graph, store, &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use repograph_graph::ROOT_ID;

    const DIFF: &str = "\
diff --git a/src/operations.py b/src/operations.py
index 3b18e51..a9c2f1e 100644
--- a/src/operations.py
+++ b/src/operations.py
@@ -1,5 +1,5 @@
-import os
+import sys
 
 def add(a, b):
     return a + b
 
";

    fn sample_graph() -> RepoGraph {
        let mut graph = RepoGraph::new(".");
        let path = "src/operations.py";
        graph.add_node(Node::directory("src", "src")).unwrap();
        graph.add_node(Node::file(path, "f")).unwrap();
        graph.add_edge(ROOT_ID, "src", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("src", path, EdgeKind::Hierarchy).unwrap();
        for (name, lines, sum) in [("BASE", "1-2", "c0"), ("add", "3-6", "c1"), ("sub", "7-10", "c2")] {
            let id = format!("{path}:{name}");
            graph
                .add_node(Node::chunk(&id, format!("{path}:{lines}"), sum))
                .unwrap();
            graph.add_edge(path, &id, EdgeKind::Hierarchy).unwrap();
        }
        graph
    }

    #[test]
    fn parses_hunk_headers() {
        assert_eq!(parse_hunk_header("@@ -1,5 +1,5 @@"), Some((1, 5, 1, 5)));
        assert_eq!(parse_hunk_header("@@ -3 +4,0 @@ fn x()"), Some((3, 1, 4, 0)));
        assert_eq!(parse_hunk_header("@@ bogus @@"), None);
    }

    #[test]
    fn single_hunk_maps_to_file_and_overlapping_chunks() {
        let mut graph = sample_graph();
        let mapping = map_diff(&mut graph, "diff:HEAD", DIFF).unwrap();

        assert_eq!(mapping.hunks.len(), 1);
        let hunk = &mapping.hunks[0];
        assert_eq!(hunk.id, "diff:HEAD:src/operations.py:1-5");
        assert_eq!(hunk.reference, "diff:HEAD:5-11");
        assert_eq!(
            hunk.linked,
            vec![
                "src/operations.py".to_string(),
                "src/operations.py:BASE".to_string(),
                "src/operations.py:add".to_string(),
            ]
        );
        assert!(graph.has_edge(&hunk.id, "src/operations.py", EdgeKind::Diff));
        assert!(graph.has_edge(&hunk.id, "src/operations.py:add", EdgeKind::Diff));
        assert!(!graph.has_edge(&hunk.id, "src/operations.py:sub", EdgeKind::Diff));
        assert!(graph.has_edge("diff:HEAD", &hunk.id, EdgeKind::Hierarchy));
        assert_eq!(graph.node("diff:HEAD").unwrap().chunks.len(), 1);
        assert!(hunk.text.starts_with("@@ -1,5 +1,5 @@"));
    }

    #[test]
    fn missing_files_are_skipped_and_remap_replaces_hunks() {
        let mut graph = sample_graph();
        let text = format!(
            "{}diff --git a/gone.py b/gone.py\n--- a/gone.py\n+++ b/gone.py\n@@ -1 +1 @@\n-a\n+b\n",
            DIFF
        );
        let mapping = map_diff(&mut graph, "diff:HEAD", &text).unwrap();
        assert_eq!(mapping.hunks.len(), 1);
        assert_eq!(mapping.skipped_files, vec!["gone.py".to_string()]);

        let before = graph.node_count();
        map_diff(&mut graph, "diff:HEAD", &text).unwrap();
        assert_eq!(graph.node_count(), before);
    }

    #[tokio::test]
    async fn apply_stores_diff_and_hunk_documents() {
        use repograph_store::{DocumentStore, Include, LexicalStore};
        use std::sync::Arc;

        let store: SharedStore = Arc::new(LexicalStore::new());
        let annotator = DiffAnnotator::new(".", "HEAD");
        let graph = annotator.apply(sample_graph(), &store, DIFF).await.unwrap();
        let diff = graph.node("diff:HEAD").unwrap();
        let got = store
            .get(&[diff.checksum.clone().unwrap()], Include::DOCUMENTS)
            .await
            .unwrap();
        assert_eq!(got.documents, vec![DIFF.to_string()]);
        assert_eq!(store.len().await, 2);
    }

    #[test]
    fn body_lines_that_look_like_headers_stay_in_the_hunk() {
        let text = "\
diff --git a/q.sql b/q.sql
--- a/q.sql
+++ b/q.sql
@@ -1,3 +1,3 @@
--- old note
+++ new note
 select 1;
 select 2;
diff --git a/r.sql b/r.sql
--- a/r.sql
+++ b/r.sql
@@ -4 +4,2 @@
-a
+b
+c
";
        let hunks = parse_unified_diff(text).unwrap();
        assert_eq!(
            hunks,
            vec![
                DiffHunk {
                    file: "q.sql".to_string(),
                    new_start: 1,
                    new_end: 3,
                    text_start: 4,
                    text_end: 8,
                },
                DiffHunk {
                    file: "r.sql".to_string(),
                    new_start: 4,
                    new_end: 5,
                    text_start: 12,
                    text_end: 15,
                },
            ]
        );
    }

    #[test]
    fn deleted_files_have_no_hunks() {
        let text = "diff --git a/old.py b/old.py\ndeleted file mode 100644\n--- a/old.py\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-a\n-b\n";
        assert!(parse_unified_diff(text).unwrap().is_empty());
    }
}
