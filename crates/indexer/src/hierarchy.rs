use crate::annotator::{check_cancelled, record_metadata, Annotator, PendingDocuments};
use crate::error::Result;
use crate::scanner::{FileScanner, ScannedFile};
use async_trait::async_trait;
use repograph_graph::{EdgeKind, Node, NodeKind, RepoGraph, ROOT_ID};
use repograph_store::{checksum, checksum_parts, SharedStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Mirrors the working tree: directory and file nodes, file checksums and
/// documents, `ROOT -> dir -> file` hierarchy edges.
pub struct HierarchyAnnotator {
    root: PathBuf,
}

impl HierarchyAnnotator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scanner(&self) -> FileScanner {
        FileScanner::new(&self.root)
    }
}

/// Hash over every file checksum in the graph, in id order
#[must_use]
pub fn files_checksum(graph: &RepoGraph) -> String {
    let files: BTreeMap<&str, &str> = graph
        .nodes_of_kind(NodeKind::File)
        .map(|node| (node.id.as_str(), node.checksum.as_deref().unwrap_or("")))
        .collect();
    let mut parts = Vec::with_capacity(files.len() * 2);
    for (id, sum) in files {
        parts.push(id);
        parts.push(sum);
    }
    checksum_parts(parts)
}

/// Parent directory id of a `/`-joined path, `ROOT` at the top
fn parent_dir(id: &str) -> &str {
    id.rsplit_once('/').map_or(ROOT_ID, |(parent, _)| parent)
}

/// Every directory above `file`, outermost first
fn directories_of(file: &str) -> Vec<&str> {
    let mut dirs = Vec::new();
    let mut current = file;
    while let Some((parent, _)) = current.rsplit_once('/') {
        dirs.push(parent);
        current = parent;
    }
    dirs.reverse();
    dirs
}

enum FileRead {
    Text(String),
    Failed(String),
}

async fn read_file(file: &ScannedFile) -> FileRead {
    match tokio::fs::read(&file.path).await {
        Ok(bytes) => {
            if bytes.contains(&0) {
                return FileRead::Failed("binary content".to_string());
            }
            match String::from_utf8(bytes) {
                Ok(text) => FileRead::Text(text),
                Err(_) => FileRead::Failed("content is not valid UTF-8".to_string()),
            }
        }
        Err(e) => FileRead::Failed(e.to_string()),
    }
}

/// Drop a file node and everything hanging below it
fn remove_file(graph: &mut RepoGraph, id: &str) {
    let below: Vec<String> = graph
        .descendants(id, EdgeKind::Hierarchy)
        .into_iter()
        .map(|node| node.id.clone())
        .collect();
    for child in below {
        graph.remove_node(&child);
    }
    graph.remove_node(id);
}

#[async_trait]
impl Annotator for HierarchyAnnotator {
    fn name(&self) -> &'static str {
        "hierarchy"
    }

    async fn is_complete(&self, graph: &RepoGraph, _store: &SharedStore) -> Result<bool> {
        let scanned = self.scanner().scan();
        let known: HashMap<&str, &Node> = graph
            .nodes_of_kind(NodeKind::File)
            .map(|node| (node.id.as_str(), node))
            .collect();
        if known.len() != scanned.len() {
            return Ok(false);
        }
        let unchanged = scanned.iter().all(|file| {
            known
                .get(file.relative.as_str())
                .is_some_and(|node| node.mtime_ms.is_some() && node.mtime_ms == file.mtime_ms)
        });
        Ok(unchanged && graph.meta().files_checksum.as_deref() == Some(files_checksum(graph).as_str()))
    }

    async fn annotate(
        &self,
        mut graph: RepoGraph,
        store: &SharedStore,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<RepoGraph> {
        let scanned = self.scanner().scan();
        let mut pending = PendingDocuments::default();
        let mut read = 0usize;
        let mut errored = 0usize;

        for file in &scanned {
            check_cancelled(cancel)?;
            let existing = graph.node(&file.relative).cloned();
            if let Some(node) = &existing {
                let fresh = node.kind == NodeKind::File
                    && node.mtime_ms.is_some()
                    && node.mtime_ms == file.mtime_ms
                    && (node.checksum.is_some() || node.is_errored());
                if fresh && !refresh {
                    continue;
                }
            }

            read += 1;
            let mut node = match existing {
                Some(node) if node.kind == NodeKind::File => node,
                Some(other) => {
                    log::warn!("{} changed from {} to file", other.id, other.kind);
                    remove_file(&mut graph, &other.id);
                    Node::errored_file(&file.relative, "unread")
                }
                None => Node::errored_file(&file.relative, "unread"),
            };
            node.mtime_ms = file.mtime_ms;
            match read_file(file).await {
                FileRead::Text(text) => {
                    let sum = checksum(&text);
                    node.checksum = Some(sum.clone());
                    node.error = None;
                    pending.push(sum, text, record_metadata("file", &file.relative));
                }
                FileRead::Failed(reason) => {
                    log::warn!("Cannot read {}: {reason}", file.relative);
                    errored += 1;
                    node.checksum = None;
                    node.error = Some(reason);
                    node.chunks.clear();
                    node.chunks_checksum = None;
                    let below: Vec<String> = graph
                        .descendants(&file.relative, EdgeKind::Hierarchy)
                        .into_iter()
                        .map(|n| n.id.clone())
                        .collect();
                    for id in below {
                        graph.remove_node(&id);
                    }
                }
            }
            graph.add_node(node)?;
        }

        let present: BTreeSet<&str> = scanned.iter().map(|f| f.relative.as_str()).collect();
        let gone: Vec<String> = graph
            .nodes_of_kind(NodeKind::File)
            .filter(|node| !present.contains(node.id.as_str()))
            .map(|node| node.id.clone())
            .collect();
        for id in &gone {
            remove_file(&mut graph, id);
        }

        let directories: BTreeSet<&str> = present.iter().copied().flat_map(directories_of).collect();
        let stale_dirs: Vec<String> = graph
            .nodes_of_kind(NodeKind::Directory)
            .filter(|node| node.id != ROOT_ID && !directories.contains(node.id.as_str()))
            .map(|node| node.id.clone())
            .collect();
        for id in &stale_dirs {
            graph.remove_node(id);
        }
        for dir in &directories {
            if !graph.contains(dir) {
                graph.add_node(Node::directory(*dir, *dir))?;
            }
            graph.add_edge(parent_dir(dir), dir, EdgeKind::Hierarchy)?;
        }
        for file in &present {
            graph.add_edge(parent_dir(file), file, EdgeKind::Hierarchy)?;
        }

        let written = pending.len();
        pending.flush(store).await?;
        let sum = files_checksum(&graph);
        graph.meta_mut().files_checksum = Some(sum);

        log::info!(
            "Hierarchy: {} files ({read} read, {errored} unreadable, {} removed), {} directories, {written} documents",
            present.len(),
            gone.len(),
            directories.len()
        );
        Ok(graph)
    }
}
