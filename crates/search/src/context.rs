use crate::error::{Result, SearchError};
use repograph_chunker::{count_lines, ChunkRef, LineSet};
use repograph_graph::{GraphError, Node, NodeKind, RepoGraph};
use repograph_store::{DocumentStore, Include, SharedStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

/// Text stored for `node`, looked up by its checksum
pub async fn fetch_document(store: &SharedStore, node: &Node) -> Result<String> {
    let checksum = node
        .checksum
        .as_deref()
        .ok_or_else(|| SearchError::MissingDocument(node.id.clone()))?;
    let got = store.get(&[checksum.to_string()], Include::DOCUMENTS).await?;
    got.document(checksum)
        .map(str::to_string)
        .ok_or_else(|| SearchError::MissingDocument(node.id.clone()))
}

#[derive(Debug)]
struct Entry {
    checksum: String,
    lines: LineSet,
    tags: BTreeSet<String>,
}

/// Where a ref's text lives: a file or diff node plus an optional line set
struct Located {
    target: String,
    checksum: String,
    lines: Option<LineSet>,
}

/// Accumulates quoted lines from files and diffs, then renders them grouped
/// per source:
///
/// ```text
/// ### src/app.py [calls, parent]
/// import os
/// ...
/// def main():
///     run()
/// ```
///
/// Refs may name a file, a diff, a chunk (quoted through its own ref) or a
/// `path:ranges` line selection.
pub struct ContextBuilder<'a> {
    graph: &'a RepoGraph,
    store: &'a SharedStore,
    documents: HashMap<String, String>,
    entries: BTreeMap<String, Entry>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(graph: &'a RepoGraph, store: &'a SharedStore) -> Self {
        Self {
            graph,
            store,
            documents: HashMap::new(),
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Quote the lines of `reference`, merging with anything already quoted
    /// from the same source.
    pub async fn add<I, S>(&mut self, reference: &str, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let located = self.locate(reference)?;
        let lines = self.lines_of(&located).await?;
        if lines.is_empty() {
            return Ok(());
        }
        let entry = self
            .entries
            .entry(located.target)
            .or_insert_with(|| Entry {
                checksum: located.checksum,
                lines: LineSet::new(),
                tags: BTreeSet::new(),
            });
        entry.lines.extend(lines);
        entry.tags.extend(tags.into_iter().map(Into::into));
        Ok(())
    }

    /// Drop the lines of `reference`; a source left without lines is dropped
    /// with its tags.
    pub async fn remove(&mut self, reference: &str) -> Result<()> {
        let located = self.locate(reference)?;
        if !self.entries.contains_key(&located.target) {
            return Ok(());
        }
        let lines = self.lines_of(&located).await?;
        if let Some(entry) = self.entries.get_mut(&located.target) {
            entry.lines.retain(|line| !lines.contains(line));
            if entry.lines.is_empty() {
                self.entries.remove(&located.target);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (target, entry) in &self.entries {
            if entry.lines.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("### ");
            out.push_str(target);
            if !entry.tags.is_empty() {
                let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
                let _ = write!(out, " [{}]", tags.join(", "));
            }
            out.push('\n');

            let text = self.documents.get(&entry.checksum).map_or("", String::as_str);
            let mut previous: Option<usize> = None;
            for (idx, line) in text.lines().enumerate() {
                let number = idx + 1;
                if !entry.lines.contains(&number) {
                    continue;
                }
                if previous.is_some_and(|prev| prev + 1 != number) {
                    out.push_str("...\n");
                }
                out.push_str(line);
                out.push('\n');
                previous = Some(number);
            }
        }
        out
    }

    fn locate(&self, reference: &str) -> Result<Located> {
        let (node, lines) = self.graph.resolve_ref(reference)?;
        let (target, lines) = match node.kind {
            NodeKind::Chunk if lines.is_none() => {
                let parsed = ChunkRef::parse(&node.reference)
                    .map_err(|e| SearchError::InvalidRef(e.to_string()))?;
                let target = self
                    .graph
                    .node(&parsed.path)
                    .ok_or_else(|| GraphError::NodeNotFound(parsed.path.clone()))?;
                (target, parsed.lines)
            }
            NodeKind::Chunk => return Err(SearchError::InvalidRef(reference.to_string())),
            _ => (node, lines),
        };
        if matches!(target.kind, NodeKind::Directory | NodeKind::Chunk) {
            return Err(SearchError::NoText(target.id.clone()));
        }
        if target.is_errored() {
            return Err(SearchError::MissingDocument(target.id.clone()));
        }
        let checksum = target
            .checksum
            .clone()
            .ok_or_else(|| SearchError::MissingDocument(target.id.clone()))?;
        Ok(Located {
            target: target.id.clone(),
            checksum,
            lines,
        })
    }

    async fn lines_of(&mut self, located: &Located) -> Result<LineSet> {
        if !self.documents.contains_key(&located.checksum) {
            let got = self
                .store
                .get(&[located.checksum.clone()], Include::DOCUMENTS)
                .await?;
            let text = got
                .document(&located.checksum)
                .ok_or_else(|| SearchError::MissingDocument(located.target.clone()))?
                .to_string();
            self.documents.insert(located.checksum.clone(), text);
        }
        let line_count = self
            .documents
            .get(&located.checksum)
            .map_or(0, |text| count_lines(text));
        let reference = ChunkRef {
            path: located.target.clone(),
            lines: located.lines.clone(),
        };
        Ok(reference.resolve_lines(line_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use repograph_store::{checksum, LexicalStore};
    use std::sync::Arc;

    const APP: &str = "import os\n\n\ndef main():\n    run()\n\n\ndef run():\n    pass\n";

    async fn fixture() -> (RepoGraph, SharedStore) {
        let store: SharedStore = Arc::new(LexicalStore::new());
        store
            .add(vec![checksum(APP)], vec![APP.to_string()], vec![])
            .await
            .unwrap();
        let mut graph = RepoGraph::new("/repo");
        graph.add_node(Node::directory("src", "src")).unwrap();
        graph.add_node(Node::file("src/app.py", checksum(APP))).unwrap();
        graph
            .add_node(Node::chunk("src/app.py:BASE", "src/app.py:1-3,6-7", "b"))
            .unwrap();
        graph
            .add_node(Node::chunk("src/app.py:main", "src/app.py:4-5", "m"))
            .unwrap();
        graph
            .add_node(Node::chunk("src/app.py:run", "src/app.py:8-9", "r"))
            .unwrap();
        graph.add_node(Node::errored_file("blob.bin", "binary")).unwrap();
        (graph, store)
    }

    #[tokio::test]
    async fn chunks_merge_into_one_source_with_gap_markers() {
        let (graph, store) = fixture().await;
        let mut builder = ContextBuilder::new(&graph, &store);
        builder.add("src/app.py:run", ["calls"]).await.unwrap();
        builder.add("src/app.py:1", ["parent"]).await.unwrap();
        assert_eq!(
            builder.render(),
            "### src/app.py [calls, parent]\nimport os\n...\ndef run():\n    pass\n"
        );
    }

    #[tokio::test]
    async fn remove_subtracts_lines_and_drops_empty_sources() {
        let (graph, store) = fixture().await;
        let mut builder = ContextBuilder::new(&graph, &store);
        builder.add("src/app.py", ["file"]).await.unwrap();
        builder.remove("src/app.py:main").await.unwrap();
        let rendered = builder.render();
        assert!(rendered.starts_with("### src/app.py [file]\nimport os\n\n\n...\n\n\ndef run():"));
        assert!(!rendered.contains("def main"));

        builder.remove("src/app.py").await.unwrap();
        assert!(builder.is_empty());
        assert_eq!(builder.render(), "");
    }

    #[tokio::test]
    async fn out_of_range_lines_are_ignored() {
        let (graph, store) = fixture().await;
        let mut builder = ContextBuilder::new(&graph, &store);
        builder.add("src/app.py:9-40", Vec::<String>::new()).await.unwrap();
        assert_eq!(builder.render(), "### src/app.py\n    pass\n");
    }

    #[tokio::test]
    async fn refs_selecting_no_lines_add_nothing() {
        let (graph, store) = fixture().await;
        let mut builder = ContextBuilder::new(&graph, &store);
        builder.add("src/app.py:0", ["base"]).await.unwrap();
        builder.add("src/app.py:40-50", ["past end"]).await.unwrap();
        assert!(builder.is_empty());
        assert_eq!(builder.render(), "");
    }

    #[tokio::test]
    async fn directories_and_unreadable_files_are_rejected() {
        let (graph, store) = fixture().await;
        let mut builder = ContextBuilder::new(&graph, &store);
        let err = builder.add("src", ["dir"]).await.unwrap_err();
        assert!(matches!(err, SearchError::NoText(id) if id == "src"));
        let err = builder.add("blob.bin", ["x"]).await.unwrap_err();
        assert!(matches!(err, SearchError::MissingDocument(_)));
        let err = builder.add("nope.py", ["x"]).await.unwrap_err();
        assert!(matches!(err, SearchError::Graph(GraphError::NodeNotFound(_))));
    }
}
