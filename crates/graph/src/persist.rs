use crate::error::{GraphError, Result};
use crate::graph::{GraphMeta, RepoGraph};
use crate::types::{EdgeKind, Node, NodeAttrs, ROOT_ID};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Node entry of a node-link document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLinkNode {
    pub id: String,
    #[serde(flatten)]
    pub attrs: NodeAttrs,
}

/// Edge entry of a node-link document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLinkEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Serialized graph: `{directed, multigraph, graph, nodes, edges}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLink {
    #[serde(default = "yes")]
    pub directed: bool,
    #[serde(default = "yes")]
    pub multigraph: bool,
    #[serde(default)]
    pub graph: GraphMeta,
    pub nodes: Vec<NodeLinkNode>,
    #[serde(default, alias = "links")]
    pub edges: Vec<NodeLinkEdge>,
}

const fn yes() -> bool {
    true
}

impl RepoGraph {
    #[must_use]
    pub fn to_node_link(&self) -> NodeLink {
        NodeLink {
            directed: true,
            multigraph: true,
            graph: self.meta().clone(),
            nodes: self
                .nodes()
                .map(|node| NodeLinkNode {
                    id: node.id.clone(),
                    attrs: node.to_attrs(),
                })
                .collect(),
            edges: self
                .edges()
                .map(|(source, target, kind)| NodeLinkEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    kind: Some(kind.as_str().to_string()),
                })
                .collect(),
        }
    }

    /// Rebuild a graph, validating every node and edge. Parallel edges of
    /// the document are kept as they are.
    pub fn from_node_link(doc: NodeLink) -> Result<Self> {
        let mut graph = Self::empty(doc.graph);
        for entry in doc.nodes {
            graph.add_node(Node::from_attrs(entry.id, entry.attrs)?)?;
        }
        if !graph.contains(ROOT_ID) {
            graph.add_node(Node::directory(ROOT_ID, "."))?;
        }
        for edge in doc.edges {
            let kind: EdgeKind = edge
                .kind
                .as_deref()
                .ok_or_else(|| {
                    GraphError::schema(format!("edge {} -> {} has no type", edge.source, edge.target))
                })?
                .parse()?;
            graph.insert_edge(&edge.source, &edge.target, kind)?;
        }
        Ok(graph)
    }

    /// Write the graph atomically (temp file + rename)
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&self.to_node_link())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        log::debug!(
            "Saved graph ({} nodes, {} edges) to {}",
            self.node_count(),
            self.edge_count(),
            path.display()
        );
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let doc: NodeLink = serde_json::from_slice(&bytes)?;
        Self::from_node_link(doc)
    }

    /// Load `path` if it exists, otherwise start a fresh graph for `cwd`
    pub async fn load_or_new(path: impl AsRef<Path>, cwd: &str) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await? {
            Self::load(path).await
        } else {
            Ok(Self::new(cwd))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkLink;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> RepoGraph {
        let mut graph = RepoGraph::new("/repo");
        let mut file = Node::file("a.py", "f1");
        file.chunks = vec![ChunkLink {
            id: "a.py:BASE".to_string(),
            reference: "a.py:1-3".to_string(),
        }];
        file.active = true;
        graph.add_node(file).unwrap();
        graph.add_node(Node::chunk("a.py:BASE", "a.py:1-3", "c0")).unwrap();
        graph.add_edge(ROOT_ID, "a.py", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("a.py", "a.py:BASE", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("a.py", "a.py:BASE", EdgeKind::Cluster).unwrap();
        graph.meta_mut().files_checksum = Some("all".to_string());
        graph
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".repograph").join("graph.json");

        let graph = sample();
        graph.save(&path).await.unwrap();
        let loaded = RepoGraph::load(&path).await.unwrap();

        assert_eq!(loaded.node_count(), 3);
        assert_eq!(loaded.edge_count(), 3);
        assert!(loaded.has_edge("a.py", "a.py:BASE", EdgeKind::Cluster));
        assert_eq!(loaded.meta(), graph.meta());
        let file = loaded.node("a.py").unwrap();
        assert!(!file.active);
        assert_eq!(file.chunks.len(), 1);
    }

    #[test]
    fn test_node_link_shape() {
        let doc = serde_json::to_value(sample().to_node_link()).unwrap();
        let file = doc["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["id"] == "a.py")
            .unwrap();
        assert_eq!(file["type"], "file");
        assert_eq!(file["ref"], "a.py");
        assert!(file.get("active").is_none());
        assert_eq!(doc["graph"]["cwd"], "/repo");
    }

    #[test]
    fn test_parallel_edges_survive_reload() {
        let doc = serde_json::json!({
            "nodes": [{"id": "a.py", "type": "file", "ref": "a.py", "checksum": "x"}],
            "edges": [
                {"source": "ROOT", "target": "a.py", "type": "hierarchy"},
                {"source": "ROOT", "target": "a.py", "type": "hierarchy"}
            ]
        });
        let doc: NodeLink = serde_json::from_value(doc).unwrap();
        let graph = RepoGraph::from_node_link(doc).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.to_node_link().edges.len(), 2);

        let mut graph = graph;
        graph.add_edge(ROOT_ID, "a.py", EdgeKind::Hierarchy).unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_invalid_documents_are_schema_errors() {
        let bad_edge = serde_json::json!({
            "nodes": [{"id": "a.py", "type": "file", "ref": "a.py", "checksum": "x"}],
            "edges": [{"source": "ROOT", "target": "a.py", "type": "owns"}]
        });
        let doc: NodeLink = serde_json::from_value(bad_edge).unwrap();
        assert!(matches!(RepoGraph::from_node_link(doc), Err(GraphError::Schema(_))));

        let no_checksum = serde_json::json!({
            "nodes": [{"id": "a.py", "type": "file", "ref": "a.py"}],
            "edges": []
        });
        let doc: NodeLink = serde_json::from_value(no_checksum).unwrap();
        assert!(matches!(RepoGraph::from_node_link(doc), Err(GraphError::Schema(_))));
    }
}
