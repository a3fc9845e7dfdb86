use crate::embeddings::{Embedder, HashedEmbedder};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::store::{rank, DocumentStore, Records};
use crate::types::{GetResult, Include, Metadata, QueryHit};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Default)]
struct Inner {
    records: Records,
    index: VectorIndex,
}

/// Embedding-backed store: `distance = 1 - cosine(query, document)`.
pub struct VectorStore {
    inner: RwLock<Inner>,
    embedder: Arc<dyn Embedder>,
    scope: Mutex<()>,
}

impl VectorStore {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        log::debug!("Initializing VectorStore (dimension {})", embedder.dimension());
        Self {
            inner: RwLock::new(Inner {
                records: Records::default(),
                index: VectorIndex::new(embedder.dimension()),
            }),
            embedder,
            scope: Mutex::new(()),
        }
    }

    /// Store with the default hashed embedder
    #[must_use]
    pub fn hashed() -> Self {
        Self::new(Arc::new(HashedEmbedder::from_env()))
    }

    /// Load records and rebuild the index (vectors are never persisted)
    pub async fn load(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let records = Records::load(path.as_ref()).await?;
        let mut index = VectorIndex::new(embedder.dimension());
        for (id, record) in records.iter() {
            index.add(id, embedder.embed(&record.document))?;
        }
        log::info!("Loaded {} store records, rebuilt vector index", records.len());
        Ok(Self {
            inner: RwLock::new(Inner { records, index }),
            embedder,
            scope: Mutex::new(()),
        })
    }

    pub async fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await? {
            Self::load(path, embedder).await
        } else {
            Ok(Self::new(embedder))
        }
    }

    async fn merge(
        &self,
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        replace: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let changed = inner.records.merge(ids, documents, metadatas, replace)?;
        if changed.is_empty() {
            return Ok(());
        }
        let fetched = inner.records.get(&changed, Include::DOCUMENTS);
        let texts: Vec<&str> = fetched.documents.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(&texts);
        for (id, vector) in fetched.ids.iter().zip(vectors) {
            inner.index.add(id, vector)?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for VectorStore {
    async fn get(&self, ids: &[String], include: Include) -> Result<GetResult> {
        Ok(self.inner.read().await.records.get(ids, include))
    }

    async fn add(&self, ids: Vec<String>, documents: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        self.merge(ids, documents, metadatas, false).await
    }

    async fn upsert(&self, ids: Vec<String>, documents: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        self.merge(ids, documents, metadatas, true).await
    }

    async fn update(&self, ids: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        self.inner.write().await.records.update(ids, metadatas)
    }

    async fn query(&self, text: &str, candidates: &[String], limit: usize) -> Result<Vec<QueryHit>> {
        let query = self.embedder.embed(text);
        let inner = self.inner.read().await;
        let ordered: Vec<&str> = inner
            .records
            .candidates(candidates)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let hits = inner
            .index
            .similarities(&query, &ordered)?
            .into_iter()
            .map(|(id, similarity)| QueryHit {
                checksum: id.to_string(),
                distance: 1.0 - similarity,
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn set_active(&self, ids: &[String], active: bool) -> Result<()> {
        self.inner.write().await.records.set_active(ids, active);
        Ok(())
    }

    async fn active_ids(&self) -> Vec<String> {
        self.inner.read().await.records.active_ids()
    }

    async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    async fn save(&self, path: &Path) -> Result<()> {
        self.inner.read().await.records.save(path).await
    }

    fn scope_lock(&self) -> &Mutex<()> {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::checksum;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn seeded() -> (VectorStore, Vec<String>) {
        let store = VectorStore::new(Arc::new(HashedEmbedder::new(128)));
        let docs = vec![
            "def parse_config(path): return load(path)".to_string(),
            "class HttpServer: def serve(self): pass".to_string(),
        ];
        let ids: Vec<String> = docs.iter().map(|d| checksum(d)).collect();
        store.add(ids.clone(), docs, vec![]).await.unwrap();
        (store, ids)
    }

    #[tokio::test]
    async fn test_query_prefers_shared_terms() {
        let (store, ids) = seeded().await;
        let hits = store.query("parse config", &ids, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].checksum, ids[0]);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_scoped_query_single_candidate() {
        let (store, ids) = seeded().await;
        let hits = store.scoped_query("anything", &ids[1..], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].checksum, ids[1]);
    }

    #[tokio::test]
    async fn test_reload_rebuilds_index() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        let (store, ids) = seeded().await;
        store.save(&path).await.unwrap();

        let loaded = VectorStore::open(&path, Arc::new(HashedEmbedder::new(128)))
            .await
            .unwrap();
        let hits = loaded.query("serve http", &ids, 1).await.unwrap();
        assert_eq!(hits[0].checksum, ids[1]);
    }
}
