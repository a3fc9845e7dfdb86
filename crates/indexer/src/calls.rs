use crate::annotator::{check_cancelled, document, Annotator};
use crate::error::Result;
use async_trait::async_trait;
use repograph_chunker::{local_name, AstAnalyzer, ChunkRef, Language};
use repograph_graph::{EdgeKind, NodeKind, RepoGraph};
use repograph_store::{checksum_parts, SharedStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;

/// Names shared by more chunks than this are too ambiguous to link across files
const MAX_CROSS_FILE_CANDIDATES: usize = 3;

/// Best-effort `call` edges: a call site inside chunk A naming the last
/// segment of chunk B links A -> B. Same-file targets win over others.
#[derive(Debug, Default)]
pub struct CallAnnotator;

impl CallAnnotator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// `a.py:Outer.inner#2` -> `inner`
fn callable_name(chunk_id: &str) -> &str {
    let name = local_name(chunk_id);
    let last = name.rsplit('.').next().unwrap_or(name);
    last.split('#').next().unwrap_or(last)
}

/// Fingerprint of the chunk sets the call edges were derived from
fn inputs_fingerprint(graph: &RepoGraph) -> String {
    let files: BTreeMap<&str, &str> = graph
        .nodes_of_kind(NodeKind::File)
        .filter_map(|node| Some((node.id.as_str(), node.chunks_checksum.as_deref()?)))
        .collect();
    checksum_parts(files.into_iter().flat_map(|(id, sum)| [id, sum]))
}

struct FileChunkLines {
    file: String,
    /// `(chunk id, owned lines)`, BASE included
    chunks: Vec<(String, BTreeSet<usize>)>,
}

impl FileChunkLines {
    fn owner_of(&self, line: usize) -> Option<&str> {
        self.chunks
            .iter()
            .find(|(_, lines)| lines.contains(&line))
            .map(|(id, _)| id.as_str())
    }
}

fn chunk_layout(graph: &RepoGraph, file: &str) -> FileChunkLines {
    let chunks = graph
        .descendants(file, EdgeKind::Hierarchy)
        .into_iter()
        .filter(|node| node.kind == NodeKind::Chunk)
        .filter_map(|node| {
            let lines = ChunkRef::parse(&node.reference).ok()?.lines?;
            Some((node.id.clone(), lines))
        })
        .collect();
    FileChunkLines {
        file: file.to_string(),
        chunks,
    }
}

#[async_trait]
impl Annotator for CallAnnotator {
    fn name(&self) -> &'static str {
        "calls"
    }

    async fn is_complete(&self, graph: &RepoGraph, _store: &SharedStore) -> Result<bool> {
        Ok(graph.meta().annotations.get(self.name()) == Some(&inputs_fingerprint(graph)))
    }

    async fn annotate(
        &self,
        mut graph: RepoGraph,
        store: &SharedStore,
        _refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<RepoGraph> {
        let stale: Vec<(String, String)> = graph
            .edges()
            .filter(|(_, _, kind)| *kind == EdgeKind::Call)
            .map(|(source, target, _)| (source.to_string(), target.to_string()))
            .collect();
        for (source, target) in &stale {
            graph.remove_edge(source, target, EdgeKind::Call);
        }

        let mut by_name: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for node in graph.nodes_of_kind(NodeKind::Chunk) {
            if let Some(file) = graph.file_of(&node.id) {
                by_name
                    .entry(callable_name(&node.id).to_string())
                    .or_default()
                    .push((file.id.clone(), node.id.clone()));
            }
        }

        let files: Vec<(String, Option<String>)> = graph
            .nodes_of_kind(NodeKind::File)
            .filter(|node| node.chunks_checksum.is_some() && Language::from_path(&node.id).supports_ast())
            .map(|node| (node.id.clone(), node.checksum.clone()))
            .collect();

        let mut links: BTreeSet<(String, String)> = BTreeSet::new();
        for (file, sum) in &files {
            check_cancelled(cancel)?;
            let text = document(store, file, sum.as_deref()).await?;
            let sites = match AstAnalyzer::for_path(file).and_then(|mut analyzer| analyzer.call_sites(&text)) {
                Ok(sites) => sites,
                Err(err) => {
                    log::debug!("{file}: no call sites ({err})");
                    continue;
                }
            };
            let layout = chunk_layout(&graph, file);
            for site in sites {
                let Some(caller) = layout.owner_of(site.line) else {
                    continue;
                };
                let Some(candidates) = by_name.get(&site.name) else {
                    continue;
                };
                let local: Vec<&(String, String)> =
                    candidates.iter().filter(|(f, _)| *f == layout.file).collect();
                let chosen: Vec<&(String, String)> = if !local.is_empty() {
                    local
                } else if candidates.len() <= MAX_CROSS_FILE_CANDIDATES {
                    candidates.iter().collect()
                } else {
                    continue;
                };
                for (_, callee) in chosen {
                    if callee != caller {
                        links.insert((caller.to_string(), callee.clone()));
                    }
                }
            }
        }

        for (caller, callee) in &links {
            graph.add_edge(caller, callee, EdgeKind::Call)?;
        }
        let fingerprint = inputs_fingerprint(&graph);
        graph
            .meta_mut()
            .annotations
            .insert(self.name().to_string(), fingerprint);
        log::info!("Calls: {} edges across {} files", links.len(), files.len());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::ChunkAnnotator;
    use repograph_chunker::{Chunker, ChunkerConfig};
    use repograph_graph::{Node, ROOT_ID};
    use repograph_store::{checksum, DocumentStore, LexicalStore};
    use std::sync::Arc;

    #[test]
    fn callable_name_strips_path_and_suffix() {
        assert_eq!(callable_name("a.py:Outer.inner#2"), "inner");
        assert_eq!(callable_name("a.py:main"), "main");
    }

    #[tokio::test]
    async fn links_callers_to_callees() {
        let app = "class Greeter:\n    def hello(self):\n        return 1\n\ndef main():\n    Greeter().hello()\n";
        let util = "def helper():\n    return main()\n";
        let store: SharedStore = Arc::new(LexicalStore::new());
        let mut graph = RepoGraph::new(".");
        for (path, text) in [("app.py", app), ("util.py", util)] {
            let sum = checksum(text);
            store
                .add(vec![sum.clone()], vec![text.to_string()], vec![])
                .await
                .unwrap();
            graph.add_node(Node::file(path, sum)).unwrap();
            graph.add_edge(ROOT_ID, path, EdgeKind::Hierarchy).unwrap();
        }
        let cancel = CancellationToken::new();
        let chunker = Arc::new(Chunker::new(ChunkerConfig::default()).unwrap());
        let graph = ChunkAnnotator::new(chunker)
            .annotate(graph, &store, false, &cancel)
            .await
            .unwrap();

        let calls = CallAnnotator::new();
        assert!(!calls.is_complete(&graph, &store).await.unwrap());
        let graph = calls.annotate(graph, &store, false, &cancel).await.unwrap();

        assert!(graph.has_edge("app.py:main", "app.py:Greeter", EdgeKind::Call));
        assert!(graph.has_edge("app.py:main", "app.py:Greeter.hello", EdgeKind::Call));
        assert!(graph.has_edge("util.py:helper", "app.py:main", EdgeKind::Call));
        assert!(calls.is_complete(&graph, &store).await.unwrap());

        let edges = graph.edge_count();
        let graph = calls.annotate(graph, &store, true, &cancel).await.unwrap();
        assert_eq!(graph.edge_count(), edges);
    }
}
