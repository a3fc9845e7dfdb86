use crate::error::{Result, SearchError};
use repograph_graph::{NodeKind, RepoGraph};
use repograph_store::{DocumentStore, SharedStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// One ranked graph node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: NodeKind,
    #[serde(rename = "ref")]
    pub reference: String,
    pub checksum: String,
    pub distance: f32,
}

/// Checksums of every searchable node in the graph, deduplicated, in first
/// seen order. Errored files are left out.
fn scope_of(graph: &RepoGraph) -> (Vec<String>, BTreeMap<&str, Vec<&str>>) {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in graph.nodes() {
        if node.is_errored() {
            continue;
        }
        let Some(checksum) = node.checksum.as_deref() else {
            continue;
        };
        if seen.insert(checksum) {
            order.push(checksum.to_string());
        }
        owners.entry(checksum).or_default().push(node.id.as_str());
    }
    for ids in owners.values_mut() {
        ids.sort_unstable();
    }
    (order, owners)
}

/// Rank the graph's nodes against `query`.
///
/// The query runs over the store scoped to the graph's checksums, so records
/// left behind by earlier passes never surface. Every node sharing a hit's
/// checksum is reported, in id order; the list is cut to `limit` nodes.
pub async fn search(query: &str, graph: &RepoGraph, store: &SharedStore, limit: usize) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    let (scope, owners) = scope_of(graph);
    log::debug!("Search: query='{}', limit={}, scope={}", query, limit, scope.len());
    if scope.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let hits = store.scoped_query(query, &scope, scope.len()).await?;

    let mut results = Vec::new();
    'hits: for hit in hits {
        for id in owners.get(hit.checksum.as_str()).into_iter().flatten() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            results.push(SearchHit {
                id: node.id.clone(),
                kind: node.kind,
                reference: node.reference.clone(),
                checksum: hit.checksum.clone(),
                distance: hit.distance,
            });
            if results.len() >= limit {
                break 'hits;
            }
        }
    }

    log::info!("Search completed: {} results", results.len());
    Ok(results)
}
