use crate::annotator::{document, Annotator};
use crate::error::{IndexerError, Result};
use async_trait::async_trait;
use repograph_chunker::ModelClient;
use repograph_graph::{EdgeKind, Node, NodeKind, RepoGraph, Summary, ROOT_ID};
use repograph_store::{checksum_parts, SharedStore};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const SYSTEM_PROMPT: &str = "You describe parts of a codebase for a retrieval index. \
Answer with two or three plain sentences naming what the code does and its key entities. \
No preamble, no markdown.";

const MAX_PROMPT_DOCUMENT_CHARS: usize = 12_000;

/// Natural-language summaries for chunks, then files, then directories
/// bottom-up. A node is only re-summarized when the hash of its inputs
/// moved; failed calls leave the node unsummarized without failing the pass.
pub struct SummaryAnnotator {
    client: Arc<dyn ModelClient>,
}

struct Job {
    id: String,
    inputs_checksum: String,
    prompt: String,
}

impl SummaryAnnotator {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }

    /// Node ids in summarization order, one group per dependency level
    fn stages(graph: &RepoGraph) -> Vec<Vec<String>> {
        let mut chunks = Vec::new();
        let mut files = Vec::new();
        let mut dirs: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for node in graph.nodes() {
            match node.kind {
                NodeKind::Chunk => chunks.push(node.id.clone()),
                NodeKind::File if !node.is_errored() => files.push(node.id.clone()),
                NodeKind::Directory => {
                    let depth = if node.id == ROOT_ID {
                        0
                    } else {
                        node.id.matches('/').count() + 1
                    };
                    dirs.entry(depth).or_default().push(node.id.clone());
                }
                _ => {}
            }
        }
        chunks.sort();
        files.sort();
        let mut stages = vec![chunks, files];
        stages.extend(dirs.into_values().rev());
        stages
    }

    async fn job_for(&self, graph: &RepoGraph, store: &SharedStore, node: &Node) -> Result<Option<Job>> {
        let (document, context) = match node.kind {
            NodeKind::Chunk => {
                let text = document(store, &node.id, node.checksum.as_deref()).await?;
                if text.trim().is_empty() {
                    return Ok(None);
                }
                (text, String::new())
            }
            NodeKind::File => {
                let text = document(store, &node.id, node.checksum.as_deref()).await?;
                let mut context = String::new();
                for link in &node.chunks {
                    if let Some(summary) = graph.node(&link.id).and_then(|c| c.summary.as_ref()) {
                        let _ = writeln!(context, "- {}: {}", link.id, summary.text);
                    }
                }
                (text, context)
            }
            NodeKind::Directory => {
                let mut children: Vec<&Node> = graph.successors(&node.id, Some(EdgeKind::Hierarchy));
                children.sort_by(|a, b| a.id.cmp(&b.id));
                let mut context = String::new();
                for child in children {
                    match &child.summary {
                        Some(summary) => {
                            let _ = writeln!(context, "- {} ({}): {}", child.id, child.kind, summary.text);
                        }
                        None => {
                            let _ = writeln!(context, "- {} ({})", child.id, child.kind);
                        }
                    }
                }
                if context.is_empty() {
                    return Ok(None);
                }
                (String::new(), context)
            }
            NodeKind::Diff => return Ok(None),
        };

        let inputs_checksum = checksum_parts([node.id.as_str(), document.as_str(), context.as_str()]);
        let excerpt: String = document.chars().take(MAX_PROMPT_DOCUMENT_CHARS).collect();
        let mut prompt = format!("Summarize the {} `{}`.\n", node.kind, node.id);
        if !excerpt.is_empty() {
            let _ = write!(prompt, "\n```\n{excerpt}\n```\n");
        }
        if !context.is_empty() {
            let _ = write!(prompt, "\nIt contains:\n{context}");
        }
        Ok(Some(Job {
            id: node.id.clone(),
            inputs_checksum,
            prompt,
        }))
    }

    async fn pending(&self, graph: &RepoGraph, store: &SharedStore, ids: &[String], refresh: bool) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for id in ids {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let Some(job) = self.job_for(graph, store, node).await? else {
                continue;
            };
            let current = node.summary.as_ref().map(|s| s.checksum.as_str());
            if refresh || current != Some(job.inputs_checksum.as_str()) {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Run one stage's jobs concurrently; the model client bounds in-flight calls
    async fn run(&self, graph: &mut RepoGraph, jobs: Vec<Job>, cancel: &CancellationToken) -> Result<(usize, usize)> {
        let mut set = JoinSet::new();
        for job in jobs {
            let client = Arc::clone(&self.client);
            set.spawn(async move {
                let result = client.complete(SYSTEM_PROMPT, &job.prompt).await;
                (job.id, job.inputs_checksum, result)
            });
        }

        let mut written = 0usize;
        let mut failed = 0usize;
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
                Ok((id, inputs_checksum, Ok(text))) => {
                    if let Some(node) = graph.node_mut(&id) {
                        node.summary = Some(Summary {
                            text: text.trim().to_string(),
                            checksum: inputs_checksum,
                        });
                        written += 1;
                    }
                }
                Ok((id, _, Err(err))) => {
                    log::warn!("Summary of {id} failed: {err}");
                    failed += 1;
                }
                Err(err) => {
                    log::warn!("Summary task failed: {err}");
                    failed += 1;
                }
            }
        }
        Ok((written, failed))
    }
}

#[async_trait]
impl Annotator for SummaryAnnotator {
    fn name(&self) -> &'static str {
        "summary"
    }

    async fn is_complete(&self, graph: &RepoGraph, store: &SharedStore) -> Result<bool> {
        for stage in Self::stages(graph) {
            if !self.pending(graph, store, &stage, false).await?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn annotate(
        &self,
        mut graph: RepoGraph,
        store: &SharedStore,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<RepoGraph> {
        let mut written = 0usize;
        let mut failed = 0usize;
        for stage in Self::stages(&graph) {
            let jobs = self.pending(&graph, store, &stage, refresh).await?;
            if jobs.is_empty() {
                continue;
            }
            log::debug!("Summarizing {} nodes with {}", jobs.len(), self.client.name());
            let (ok, err) = self.run(&mut graph, jobs, cancel).await?;
            written += ok;
            failed += err;
        }
        log::info!("Summaries: {written} written, {failed} failed");
        Ok(graph)
    }
}
