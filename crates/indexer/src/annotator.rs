use crate::error::{IndexerError, Result};
use async_trait::async_trait;
use repograph_graph::RepoGraph;
use repograph_store::{DocumentStore, Include, Metadata, SharedStore};
use tokio_util::sync::CancellationToken;

/// One stage of the update pipeline.
///
/// An annotator receives the working copy of the graph and returns the
/// annotated copy; on error the caller drops the copy and nothing is
/// persisted.
#[async_trait]
pub trait Annotator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the graph already reflects this annotator's current inputs
    async fn is_complete(&self, graph: &RepoGraph, store: &SharedStore) -> Result<bool>;

    async fn annotate(
        &self,
        graph: RepoGraph,
        store: &SharedStore,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<RepoGraph>;
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IndexerError::Cancelled);
    }
    Ok(())
}

/// Fetch the document stored under `checksum` for node `id`
pub(crate) async fn document(store: &SharedStore, id: &str, checksum: Option<&str>) -> Result<String> {
    let checksum =
        checksum.ok_or_else(|| IndexerError::missing_dependency(format!("node '{id}' has no checksum")))?;
    let found = store.get(&[checksum.to_string()], Include::DOCUMENTS).await?;
    found
        .document(checksum)
        .map(str::to_string)
        .ok_or_else(|| IndexerError::missing_dependency(format!("no stored document for '{id}' ({checksum})")))
}

pub(crate) fn record_metadata(kind: &str, id: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("type".to_string(), kind.into());
    metadata.insert("id".to_string(), id.into());
    metadata
}

/// Batched writes for one annotator pass
#[derive(Debug, Default)]
pub(crate) struct PendingDocuments {
    ids: Vec<String>,
    documents: Vec<String>,
    metadatas: Vec<Metadata>,
}

impl PendingDocuments {
    pub(crate) fn push(&mut self, checksum: String, document: String, metadata: Metadata) {
        self.ids.push(checksum);
        self.documents.push(document);
        self.metadatas.push(metadata);
    }

    pub(crate) const fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) async fn flush(self, store: &SharedStore) -> Result<()> {
        if self.ids.is_empty() {
            return Ok(());
        }
        store.add(self.ids, self.documents, self.metadatas).await?;
        Ok(())
    }
}
