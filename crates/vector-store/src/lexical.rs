use crate::error::Result;
use crate::store::{rank, DocumentStore, Records};
use crate::types::{GetResult, Include, Metadata, QueryHit};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};

/// In-memory term-frequency ranker.
///
/// A candidate scores `sum(tf(term, doc) * idf(term))` over the query terms,
/// with idf computed over the candidate set. Scores are normalized so the
/// best candidate has 1, and `distance = 1 - score`.
#[derive(Debug, Default)]
pub struct LexicalStore {
    records: RwLock<Records>,
    scope: Mutex<()>,
}

impl LexicalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let records = Records::load(path.as_ref()).await?;
        log::info!("Loaded {} store records", records.len());
        Ok(Self {
            records: RwLock::new(records),
            scope: Mutex::new(()),
        })
    }

    /// Load `path` if it exists, otherwise start empty
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await? {
            Self::load(path).await
        } else {
            Ok(Self::new())
        }
    }
}

/// Lowercased identifier-ish terms; `snake_case` and `camelCase` words are
/// also split into their parts.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        let lower = word.to_lowercase();
        let mut parts = split_word(word);
        if parts.len() > 1 {
            terms.append(&mut parts);
        }
        terms.push(lower);
    }
    terms
}

fn split_word(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in word.chars() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

pub(crate) fn term_counts(text: &str) -> (HashMap<String, usize>, usize) {
    let mut counts = HashMap::new();
    let mut total = 0;
    for term in tokenize(text) {
        *counts.entry(term).or_insert(0) += 1;
        total += 1;
    }
    (counts, total)
}

/// Score each document against the query; returns distances in input order
pub(crate) fn lexical_distances(query: &str, documents: &[&str]) -> Vec<f32> {
    let mut query_terms = tokenize(query);
    query_terms.sort();
    query_terms.dedup();

    let stats: Vec<(HashMap<String, usize>, usize)> =
        documents.iter().map(|doc| term_counts(doc)).collect();

    let n = documents.len() as f32;
    let idf: HashMap<&str, f32> = query_terms
        .iter()
        .map(|term| {
            let df = stats.iter().filter(|(counts, _)| counts.contains_key(term)).count() as f32;
            (term.as_str(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
        })
        .collect();

    let scores: Vec<f32> = stats
        .iter()
        .map(|(counts, total)| {
            if *total == 0 {
                return 0.0;
            }
            query_terms
                .iter()
                .map(|term| {
                    let tf = counts.get(term).copied().unwrap_or(0) as f32 / *total as f32;
                    tf * idf.get(term.as_str()).copied().unwrap_or(0.0)
                })
                .sum()
        })
        .collect();

    let max = scores.iter().copied().fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return vec![1.0; scores.len()];
    }
    scores.into_iter().map(|score| 1.0 - score / max).collect()
}

#[async_trait]
impl DocumentStore for LexicalStore {
    async fn get(&self, ids: &[String], include: Include) -> Result<GetResult> {
        Ok(self.records.read().await.get(ids, include))
    }

    async fn add(&self, ids: Vec<String>, documents: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        self.records
            .write()
            .await
            .merge(ids, documents, metadatas, false)
            .map(|_| ())
    }

    async fn upsert(&self, ids: Vec<String>, documents: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        self.records
            .write()
            .await
            .merge(ids, documents, metadatas, true)
            .map(|_| ())
    }

    async fn update(&self, ids: Vec<String>, metadatas: Vec<Metadata>) -> Result<()> {
        self.records.write().await.update(ids, metadatas)
    }

    async fn query(&self, text: &str, candidates: &[String], limit: usize) -> Result<Vec<QueryHit>> {
        let records = self.records.read().await;
        let candidates = records.candidates(candidates);
        let documents: Vec<&str> = candidates
            .iter()
            .map(|(_, record)| record.document.as_str())
            .collect();
        let distances = lexical_distances(text, &documents);

        let hits = candidates
            .iter()
            .zip(distances)
            .map(|((id, _), distance)| QueryHit {
                checksum: (*id).to_string(),
                distance,
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn set_active(&self, ids: &[String], active: bool) -> Result<()> {
        self.records.write().await.set_active(ids, active);
        Ok(())
    }

    async fn active_ids(&self) -> Vec<String> {
        self.records.read().await.active_ids()
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    async fn save(&self, path: &Path) -> Result<()> {
        self.records.read().await.save(path).await
    }

    fn scope_lock(&self) -> &Mutex<()> {
        &self.scope
    }
}
