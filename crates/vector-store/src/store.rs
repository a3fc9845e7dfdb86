use crate::error::{Result, StoreError};
use crate::types::{GetResult, Include, Metadata, QueryHit, StoredRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Content-addressed document store keyed by checksum.
///
/// Records are never physically deleted; scoping is done with transient
/// `active` flags that are never persisted.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Batch lookup. Missing ids are silently omitted.
    async fn get(&self, ids: &[String], include: Include) -> Result<GetResult>;

    /// Insert-or-merge. Duplicate checksums collapse to one record and
    /// metadata merges key by key, last write wins.
    async fn add(&self, ids: Vec<String>, documents: Vec<String>, metadatas: Vec<Metadata>) -> Result<()>;

    /// Like [`DocumentStore::add`], but also replaces the stored document
    async fn upsert(&self, ids: Vec<String>, documents: Vec<String>, metadatas: Vec<Metadata>) -> Result<()>;

    /// Merge metadata into existing records. Fails with
    /// [`StoreError::NotFound`] without touching anything if any id is absent.
    async fn update(&self, ids: Vec<String>, metadatas: Vec<Metadata>) -> Result<()>;

    /// Rank `candidates` against `text`, ascending distance, ties in store
    /// order. Unknown candidates are ignored.
    async fn query(&self, text: &str, candidates: &[String], limit: usize) -> Result<Vec<QueryHit>>;

    async fn set_active(&self, ids: &[String], active: bool) -> Result<()>;

    async fn active_ids(&self) -> Vec<String>;

    async fn len(&self) -> usize;

    /// Persist every record (never the active flags)
    async fn save(&self, path: &Path) -> Result<()>;

    /// Mutex serializing scoped queries against each other
    fn scope_lock(&self) -> &tokio::sync::Mutex<()>;

    /// Flag `ids` active, query the active set, unflag, all inside the
    /// scope critical section.
    async fn scoped_query(&self, text: &str, ids: &[String], limit: usize) -> Result<Vec<QueryHit>> {
        let _guard = self.scope_lock().lock().await;
        self.set_active(ids, true).await?;
        let active = self.active_ids().await;
        let hits = self.query(text, &active, limit).await;
        self.set_active(ids, false).await?;
        hits
    }
}

/// Store handle passed through the annotator pipeline
pub type SharedStore = Arc<dyn DocumentStore>;

/// Record table shared by the backends
#[derive(Debug, Default)]
pub(crate) struct Records {
    map: HashMap<String, StoredRecord>,
    next_seq: u64,
    active: HashSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    schema_version: u32,
    records: BTreeMap<String, StoredRecord>,
}

fn check_lengths(ids: usize, other: usize, what: &str) -> Result<()> {
    if other != 0 && other != ids {
        return Err(StoreError::Other(format!(
            "{ids} ids but {other} {what}"
        )));
    }
    Ok(())
}

impl Records {
    pub(crate) fn get(&self, ids: &[String], include: Include) -> GetResult {
        let mut out = GetResult::default();
        for id in ids {
            let Some(record) = self.map.get(id) else {
                continue;
            };
            out.ids.push(id.clone());
            if include.documents {
                out.documents.push(record.document.clone());
            }
            if include.metadatas {
                out.metadatas.push(record.metadata.clone());
            }
        }
        out
    }

    /// Returns the ids whose document was inserted or replaced
    pub(crate) fn merge(
        &mut self,
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        replace_documents: bool,
    ) -> Result<Vec<String>> {
        if documents.len() != ids.len() {
            return Err(StoreError::Other(format!(
                "{} ids but {} documents",
                ids.len(),
                documents.len()
            )));
        }
        check_lengths(ids.len(), metadatas.len(), "metadatas")?;

        let mut metadatas = metadatas.into_iter();
        let mut changed = Vec::new();
        for (id, document) in ids.into_iter().zip(documents) {
            let metadata = metadatas.next().unwrap_or_default();
            match self.map.get_mut(&id) {
                Some(record) => {
                    if replace_documents && record.document != document {
                        record.document = document;
                        changed.push(id.clone());
                    }
                    record.metadata.extend(metadata);
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.map.insert(
                        id.clone(),
                        StoredRecord {
                            document,
                            metadata,
                            seq,
                        },
                    );
                    changed.push(id);
                }
            }
        }
        Ok(changed)
    }

    pub(crate) fn update(&mut self, ids: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        check_lengths(ids.len(), metadatas.len(), "metadatas")?;
        if let Some(missing) = ids.iter().find(|id| !self.map.contains_key(*id)) {
            return Err(StoreError::NotFound(missing.clone()));
        }
        for (id, metadata) in ids.into_iter().zip(metadatas) {
            if let Some(record) = self.map.get_mut(&id) {
                record.metadata.extend(metadata);
            }
        }
        Ok(())
    }

    pub(crate) fn set_active(&mut self, ids: &[String], active: bool) {
        for id in ids {
            if active {
                if self.map.contains_key(id) {
                    self.active.insert(id.clone());
                }
            } else {
                self.active.remove(id);
            }
        }
    }

    /// Active ids in store order
    pub(crate) fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<&String> = self.active.iter().collect();
        ids.sort_by_key(|id| self.map.get(*id).map_or(u64::MAX, |r| r.seq));
        ids.into_iter().cloned().collect()
    }

    /// Known candidates, deduplicated, in store order
    pub(crate) fn candidates<'a>(&'a self, ids: &'a [String]) -> Vec<(&'a str, &'a StoredRecord)> {
        let mut seen = HashSet::new();
        let mut out: Vec<(&str, &StoredRecord)> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.map.get(id).map(|record| (id.as_str(), record)))
            .collect();
        out.sort_by_key(|(_, record)| record.seq);
        out
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &StoredRecord)> {
        self.map.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedStore {
            schema_version: STORE_SCHEMA_VERSION,
            records: self.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let bytes = serde_json::to_vec(&persisted)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::debug!("Saved {} store records to {}", self.map.len(), path.display());
        Ok(())
    }

    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let persisted: PersistedStore = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != STORE_SCHEMA_VERSION {
            return Err(StoreError::Other(format!(
                "Unsupported store schema_version {} (expected {STORE_SCHEMA_VERSION})",
                persisted.schema_version
            )));
        }
        let next_seq = persisted
            .records
            .values()
            .map(|record| record.seq + 1)
            .max()
            .unwrap_or(0);
        Ok(Self {
            map: persisted.records.into_iter().collect(),
            next_seq,
            active: HashSet::new(),
        })
    }
}

/// Stable ascending sort by distance, then cut to `limit`
pub(crate) fn rank(mut hits: Vec<QueryHit>, limit: usize) -> Vec<QueryHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}
