use crate::annotator::{check_cancelled, document, record_metadata, Annotator, PendingDocuments};
use crate::error::{IndexerError, Result};
use async_trait::async_trait;
use repograph_chunker::resolver::parent_in;
use repograph_chunker::{slice_lines, Chunker, FileChunks};
use repograph_graph::{ChunkLink, EdgeKind, Node, NodeKind, RepoGraph};
use repograph_store::{checksum, SharedStore};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Regenerates the chunk nodes of every file whose checksum moved since its
/// chunks were last produced.
pub struct ChunkAnnotator {
    chunker: Arc<Chunker>,
}

impl ChunkAnnotator {
    pub fn new(chunker: Arc<Chunker>) -> Self {
        Self { chunker }
    }

    fn wants_chunks(&self, node: &Node) -> bool {
        if node.kind != NodeKind::File || node.is_errored() || node.checksum.is_none() {
            return false;
        }
        let ext = Path::new(&node.id)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        self.chunker.config().accepts_extension(ext)
    }

    /// Chunk every target concurrently, one task per file. Model calls are
    /// bounded by the client; results come back keyed by file id.
    async fn chunk_all(
        &self,
        graph: &RepoGraph,
        store: &SharedStore,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, (String, FileChunks)>> {
        let mut set = JoinSet::new();
        for id in targets {
            check_cancelled(cancel)?;
            let Some(file) = graph.node(id) else {
                continue;
            };
            let text = document(store, id, file.checksum.as_deref()).await?;
            let chunker = Arc::clone(&self.chunker);
            let id = id.clone();
            set.spawn(async move {
                let result = chunker.chunk(&id, &text).await;
                (id, text, result)
            });
        }

        let mut chunked = BTreeMap::new();
        loop {
            let joined = tokio::select! {
                () = cancel.cancelled() => {
                    set.abort_all();
                    return Err(IndexerError::Cancelled);
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok((id, text, result)) => {
                    chunked.insert(id, (text, result?));
                }
                Err(err) => {
                    set.abort_all();
                    return Err(IndexerError::Model(format!("chunk task failed: {err}")));
                }
            }
        }
        Ok(chunked)
    }
}

/// Remove every chunk below `file`
fn drop_chunks(graph: &mut RepoGraph, file: &str) -> usize {
    let ids: Vec<String> = graph
        .descendants(file, EdgeKind::Hierarchy)
        .into_iter()
        .filter(|node| node.kind == NodeKind::Chunk)
        .map(|node| node.id.clone())
        .collect();
    for id in &ids {
        graph.remove_node(id);
    }
    ids.len()
}

#[async_trait]
impl Annotator for ChunkAnnotator {
    fn name(&self) -> &'static str {
        "chunks"
    }

    async fn is_complete(&self, graph: &RepoGraph, _store: &SharedStore) -> Result<bool> {
        Ok(graph.nodes_of_kind(NodeKind::File).all(|node| {
            if self.wants_chunks(node) {
                node.chunks_checksum.is_some() && node.chunks_checksum == node.checksum
            } else {
                node.chunks_checksum.is_none()
            }
        }))
    }

    async fn annotate(
        &self,
        mut graph: RepoGraph,
        store: &SharedStore,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<RepoGraph> {
        let mut targets = Vec::new();
        let mut cleared = Vec::new();
        for node in graph.nodes_of_kind(NodeKind::File) {
            if self.wants_chunks(node) {
                if refresh || node.chunks_checksum != node.checksum {
                    targets.push(node.id.clone());
                }
            } else if node.chunks_checksum.is_some() || !node.chunks.is_empty() {
                cleared.push(node.id.clone());
            }
        }
        targets.sort();

        for id in &cleared {
            drop_chunks(&mut graph, id);
            if let Some(node) = graph.node_mut(id) {
                node.chunks.clear();
                node.chunks_checksum = None;
            }
        }

        let chunked = self.chunk_all(&graph, store, &targets, cancel).await?;

        let mut pending = PendingDocuments::default();
        let mut produced = 0usize;
        for (id, (text, resolved)) in chunked {
            let Some(mut file) = graph.node(&id).cloned() else {
                continue;
            };
            let dropped = drop_chunks(&mut graph, &id);
            log::debug!(
                "{id}: {} chunks via {} (replaced {dropped})",
                resolved.chunks.len(),
                resolved.source.as_str()
            );

            let known: HashSet<String> = resolved.chunks.iter().map(|c| c.id.clone()).collect();
            for chunk in &resolved.chunks {
                let body = slice_lines(&text, &chunk.lines);
                let sum = checksum(&body);
                graph.add_node(Node::chunk(&chunk.id, &chunk.reference, &sum))?;
                pending.push(sum, body, record_metadata("chunk", &chunk.id));
            }
            for chunk in &resolved.chunks {
                let parent = if chunk.is_base() {
                    id.clone()
                } else {
                    parent_in(&chunk.id, &known)
                };
                graph.add_edge(&parent, &chunk.id, EdgeKind::Hierarchy)?;
            }

            produced += resolved.chunks.len();
            file.chunks = resolved
                .chunks
                .iter()
                .map(|chunk| ChunkLink {
                    id: chunk.id.clone(),
                    reference: chunk.reference.clone(),
                })
                .collect();
            file.chunks_checksum.clone_from(&file.checksum);
            graph.add_node(file)?;
        }

        pending.flush(store).await?;
        log::info!(
            "Chunks: {} files rechunked into {produced} chunks, {} cleared",
            targets.len(),
            cleared.len()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexerError;
    use pretty_assertions::assert_eq;
    use repograph_chunker::{ChunkerConfig, ChunkingStrategy, ModelClient};
    use repograph_graph::ROOT_ID;
    use repograph_store::{DocumentStore, LexicalStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const APP: &str = "import os\n\nclass Greeter:\n    def hello(self):\n        return \"hi\"\n\ndef main():\n    Greeter().hello()\n";

    async fn seeded(text: &str) -> (RepoGraph, SharedStore) {
        let store: SharedStore = Arc::new(LexicalStore::new());
        let sum = checksum(text);
        store
            .add(vec![sum.clone()], vec![text.to_string()], vec![])
            .await
            .unwrap();
        let mut graph = RepoGraph::new(".");
        graph.add_node(Node::file("app.py", sum)).unwrap();
        graph.add_edge(ROOT_ID, "app.py", EdgeKind::Hierarchy).unwrap();
        (graph, store)
    }

    fn annotator() -> ChunkAnnotator {
        ChunkAnnotator::new(Arc::new(Chunker::new(ChunkerConfig::default()).unwrap()))
    }

    #[tokio::test]
    async fn chunks_hang_off_their_parents() {
        let (graph, store) = seeded(APP).await;
        let annotator = annotator();
        assert!(!annotator.is_complete(&graph, &store).await.unwrap());

        let graph = annotator
            .annotate(graph, &store, false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(graph.has_edge("app.py", "app.py:BASE", EdgeKind::Hierarchy));
        assert!(graph.has_edge("app.py:BASE", "app.py:Greeter", EdgeKind::Hierarchy));
        assert!(graph.has_edge("app.py:Greeter", "app.py:Greeter.hello", EdgeKind::Hierarchy));
        assert!(graph.has_edge("app.py:BASE", "app.py:main", EdgeKind::Hierarchy));
        let file = graph.node("app.py").unwrap();
        assert_eq!(file.chunks.first().map(|c| c.id.as_str()), Some("app.py:BASE"));
        assert_eq!(file.chunks.len(), 4);
        assert_eq!(file.chunks_checksum, file.checksum);
        assert!(annotator.is_complete(&graph, &store).await.unwrap());

        let hello = graph.node("app.py:Greeter.hello").unwrap();
        let got = store
            .get(&[hello.checksum.clone().unwrap()], repograph_store::Include::DOCUMENTS)
            .await
            .unwrap();
        assert_eq!(got.documents, vec!["    def hello(self):\n        return \"hi\"".to_string()]);
    }

    #[tokio::test]
    async fn rechunk_replaces_the_whole_set() {
        let (graph, store) = seeded(APP).await;
        let annotator = annotator();
        let cancel = CancellationToken::new();
        let mut graph = annotator.annotate(graph, &store, false, &cancel).await.unwrap();

        let edited = "def main():\n    pass\n";
        let sum = checksum(edited);
        store
            .add(vec![sum.clone()], vec![edited.to_string()], vec![])
            .await
            .unwrap();
        graph.node_mut("app.py").unwrap().checksum = Some(sum);
        assert!(!annotator.is_complete(&graph, &store).await.unwrap());

        let graph = annotator.annotate(graph, &store, false, &cancel).await.unwrap();
        assert!(!graph.contains("app.py:Greeter"));
        assert!(!graph.contains("app.py:Greeter.hello"));
        assert!(graph.contains("app.py:main"));
    }

    struct SlowClient {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for SlowClient {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> repograph_chunker::Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let path = prompt
                .lines()
                .next()
                .and_then(|line| line.strip_prefix("File: "))
                .unwrap_or_default();
            Ok(format!(r#"[{{"id":"{path}:main","start_line":1,"end_line":2}}]"#))
        }
    }

    #[tokio::test]
    async fn generated_chunking_runs_files_concurrently() {
        let text = "def main():\n    pass\n";
        let sum = checksum(text);
        let store: SharedStore = Arc::new(LexicalStore::new());
        store
            .add(vec![sum.clone()], vec![text.to_string()], vec![])
            .await
            .unwrap();
        let mut graph = RepoGraph::new(".");
        for id in ["a.py", "b.py", "c.py"] {
            graph.add_node(Node::file(id, &sum)).unwrap();
            graph.add_edge(ROOT_ID, id, EdgeKind::Hierarchy).unwrap();
        }

        let client = Arc::new(SlowClient {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let chunker = Chunker::new(ChunkerConfig {
            strategy: ChunkingStrategy::Generated,
            ..Default::default()
        })
        .unwrap()
        .with_model(client.clone());
        let graph = ChunkAnnotator::new(Arc::new(chunker))
            .annotate(graph, &store, false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(client.peak.load(Ordering::SeqCst) > 1);
        for id in ["a.py", "b.py", "c.py"] {
            let main = format!("{id}:main");
            assert!(graph.has_edge(&format!("{id}:BASE"), &main, EdgeKind::Hierarchy));
            let file = graph.node(id).unwrap();
            assert_eq!(file.chunks_checksum, file.checksum);
        }
    }

    #[tokio::test]
    async fn missing_document_is_a_dependency_error() {
        let mut graph = RepoGraph::new(".");
        graph.add_node(Node::file("app.py", "deadbeef")).unwrap();
        let store: SharedStore = Arc::new(LexicalStore::new());
        let err = annotator()
            .annotate(graph, &store, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::MissingDependency(_)));
    }
}
