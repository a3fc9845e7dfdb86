use crate::error::{GraphError, Result};
use crate::types::{Edge, EdgeKind, Node, NodeKind, ROOT_ID};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use repograph_chunker::{ChunkRef, LineSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Graph-level attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMeta {
    pub cwd: String,
    /// Hash over every file checksum in the graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_checksum: Option<String>,
    /// Per-annotator completion fingerprints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Knowledge graph of a repository: directories, files, chunks and diffs
/// joined by typed edges.
///
/// Node handles stay valid across removals; lookups go through the id index.
#[derive(Debug, Clone)]
pub struct RepoGraph {
    graph: StableDiGraph<Node, Edge>,
    index: HashMap<String, NodeIndex>,
    meta: GraphMeta,
}

impl RepoGraph {
    /// Empty graph holding only `ROOT`
    #[must_use]
    pub fn new(cwd: impl Into<String>) -> Self {
        let mut graph = Self::empty(GraphMeta {
            cwd: cwd.into(),
            ..Default::default()
        });
        let root = Node::directory(ROOT_ID, ".");
        let idx = graph.graph.add_node(root);
        graph.index.insert(ROOT_ID.to_string(), idx);
        graph
    }

    pub(crate) fn empty(meta: GraphMeta) -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            meta,
        }
    }

    #[must_use]
    pub const fn meta(&self) -> &GraphMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut GraphMeta {
        &mut self.meta
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let idx = *self.index.get(id)?;
        self.graph.node_weight_mut(idx)
    }

    fn require(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Insert a node, or replace the attributes of an existing one in place
    /// (edges are kept).
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        node.validate()?;
        if let Some(&idx) = self.index.get(&node.id) {
            if let Some(slot) = self.graph.node_weight_mut(idx) {
                *slot = node;
            }
            return Ok(());
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        Ok(())
    }

    /// Add a typed edge. Adding the same `(source, target, kind)` twice is a
    /// no-op.
    pub fn add_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> Result<()> {
        let u = self.require(source)?;
        let v = self.require(target)?;
        if !self.has_edge_idx(u, v, kind) {
            self.graph.add_edge(u, v, Edge { kind });
        }
        Ok(())
    }

    /// Add a typed edge even when an equal one exists; used when loading a
    /// persisted multigraph so its edge multiplicity survives.
    pub(crate) fn insert_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> Result<()> {
        let u = self.require(source)?;
        let v = self.require(target)?;
        self.graph.add_edge(u, v, Edge { kind });
        Ok(())
    }

    /// Remove every edge of `kind` between `source` and `target`
    pub fn remove_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> bool {
        let (Some(&u), Some(&v)) = (self.index.get(source), self.index.get(target)) else {
            return false;
        };
        let doomed: Vec<_> = self
            .graph
            .edges_directed(u, Direction::Outgoing)
            .filter(|e| e.target() == v && e.weight().kind == kind)
            .map(|e| e.id())
            .collect();
        for edge in &doomed {
            self.graph.remove_edge(*edge);
        }
        !doomed.is_empty()
    }

    /// Remove a node and all its edges
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let idx = self.index.remove(id)?;
        self.graph.remove_node(idx)
    }

    fn has_edge_idx(&self, u: NodeIndex, v: NodeIndex, kind: EdgeKind) -> bool {
        self.graph
            .edges_directed(u, Direction::Outgoing)
            .any(|e| e.target() == v && e.weight().kind == kind)
    }

    #[must_use]
    pub fn has_edge(&self, source: &str, target: &str, kind: EdgeKind) -> bool {
        match (self.index.get(source), self.index.get(target)) {
            (Some(&u), Some(&v)) => self.has_edge_idx(u, v, kind),
            _ => false,
        }
    }

    fn neighbors(&self, id: &str, dir: Direction, kind: Option<EdgeKind>) -> Vec<&Node> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .edges_directed(idx, dir)
            .filter(|e| kind.map_or(true, |k| e.weight().kind == k))
            .map(|e| match dir {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            })
            .filter(|other| seen.insert(*other))
            .filter_map(|other| self.graph.node_weight(other))
            .collect()
    }

    /// Targets of outgoing edges, optionally restricted to one kind
    #[must_use]
    pub fn successors(&self, id: &str, kind: Option<EdgeKind>) -> Vec<&Node> {
        self.neighbors(id, Direction::Outgoing, kind)
    }

    /// Sources of incoming edges, optionally restricted to one kind
    #[must_use]
    pub fn predecessors(&self, id: &str, kind: Option<EdgeKind>) -> Vec<&Node> {
        self.neighbors(id, Direction::Incoming, kind)
    }

    fn degree(&self, id: &str, dir: Direction, kind: Option<EdgeKind>) -> usize {
        self.index.get(id).map_or(0, |&idx| {
            self.graph
                .edges_directed(idx, dir)
                .filter(|e| kind.map_or(true, |k| e.weight().kind == k))
                .count()
        })
    }

    #[must_use]
    pub fn in_degree(&self, id: &str, kind: Option<EdgeKind>) -> usize {
        self.degree(id, Direction::Incoming, kind)
    }

    #[must_use]
    pub fn out_degree(&self, id: &str, kind: Option<EdgeKind>) -> usize {
        self.degree(id, Direction::Outgoing, kind)
    }

    /// Every node reachable from `id` over edges of `kind`, in depth-first
    /// preorder, excluding `id` itself.
    #[must_use]
    pub fn descendants(&self, id: &str, kind: EdgeKind) -> Vec<&Node> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut visited = HashSet::from([start]);
        let mut stack = vec![start];
        let mut out = Vec::new();

        while let Some(current) = stack.pop() {
            if current != start {
                if let Some(node) = self.graph.node_weight(current) {
                    out.push(node);
                }
            }
            let mut children: Vec<NodeIndex> = self
                .graph
                .edges_directed(current, Direction::Outgoing)
                .filter(|e| e.weight().kind == kind)
                .map(|e| e.target())
                .filter(|target| !visited.contains(target))
                .collect();
            // Lowest handle on top of the stack: children in insertion order
            children.sort_unstable_by(|a, b| b.cmp(a));
            for child in children {
                if visited.insert(child) {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Hierarchy ancestors of `id`, nearest first, ending at `ROOT`
    #[must_use]
    pub fn ancestors(&self, id: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut current = id.to_string();
        while let Some(parent) = self.predecessors(&current, Some(EdgeKind::Hierarchy)).first() {
            if !seen.insert(parent.id.clone()) {
                break;
            }
            current.clone_from(&parent.id);
            out.push(*parent);
        }
        out
    }

    /// Nearest file node at or above `id`
    #[must_use]
    pub fn file_of(&self, id: &str) -> Option<&Node> {
        let node = self.node(id)?;
        if node.kind == NodeKind::File {
            return Some(node);
        }
        self.ancestors(id)
            .into_iter()
            .find(|node| node.kind == NodeKind::File)
    }

    /// Copy of the nodes in `ids` with every edge that joins two of them
    #[must_use]
    pub fn subgraph<'a, I>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sub = Self::empty(self.meta.clone());
        for id in ids {
            if let Some(node) = self.node(id) {
                let idx = sub.graph.add_node(node.clone());
                sub.index.insert(node.id.clone(), idx);
            }
        }
        for edge in (&self.graph).edge_references() {
            let source = &self.graph[edge.source()].id;
            let target = &self.graph[edge.target()].id;
            if let (Some(&u), Some(&v)) = (sub.index.get(source), sub.index.get(target)) {
                sub.graph.add_edge(u, v, *edge.weight());
            }
        }
        sub
    }

    /// Ids in the weakly connected component containing `id`
    #[must_use]
    pub fn component_of(&self, id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut visited = HashSet::from([start]);
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(current) = stack.pop() {
            out.push(self.graph[current].id.as_str());
            for next in self.graph.neighbors_undirected(current) {
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        out
    }

    /// Resolve a `path[:ranges]` ref (or a bare node id) to its node and the
    /// requested lines. `None` lines means the node's whole text.
    pub fn resolve_ref(&self, raw: &str) -> Result<(&Node, Option<LineSet>)> {
        if let Some(node) = self.node(raw) {
            return Ok((node, None));
        }
        let parsed = ChunkRef::parse(raw).map_err(|e| GraphError::InvalidRef(e.to_string()))?;
        let node = self
            .node(&parsed.path)
            .ok_or_else(|| GraphError::NodeNotFound(parsed.path.clone()))?;
        Ok((node, parsed.lines))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph
            .node_indices()
            .filter_map(move |idx| self.graph.node_weight(idx))
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes().filter(move |node| node.kind == kind)
    }

    /// All edges as `(source, target, kind)`
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, EdgeKind)> {
        (&self.graph).edge_references().map(|edge| {
            (
                self.graph[edge.source()].id.as_str(),
                self.graph[edge.target()].id.as_str(),
                edge.weight().kind,
            )
        })
    }

    /// Set the transient scope flag on one node
    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        self.node_mut(id).map(|node| node.active = active).is_some()
    }

    /// Clear every scope flag
    pub fn clear_active(&mut self) {
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for idx in indices {
            self.graph[idx].active = false;
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> RepoGraph {
        let mut graph = RepoGraph::new("/repo");
        graph.add_node(Node::directory("src", "src")).unwrap();
        graph.add_node(Node::file("src/a.py", "f1")).unwrap();
        graph.add_node(Node::chunk("src/a.py:BASE", "src/a.py:1-2", "c0")).unwrap();
        graph.add_node(Node::chunk("src/a.py:A", "src/a.py:3-4", "c1")).unwrap();
        graph.add_node(Node::chunk("src/a.py:A.f", "src/a.py:5-9", "c2")).unwrap();
        graph.add_edge(ROOT_ID, "src", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("src", "src/a.py", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("src/a.py", "src/a.py:BASE", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("src/a.py", "src/a.py:A", EdgeKind::Hierarchy).unwrap();
        graph.add_edge("src/a.py:A", "src/a.py:A.f", EdgeKind::Hierarchy).unwrap();
        graph
    }

    fn ids<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Vec<&'a str> {
        nodes.into_iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_add_edge_is_idempotent_per_kind() {
        let mut graph = sample();
        let before = graph.edge_count();
        graph.add_edge("src/a.py:A.f", "src/a.py:BASE", EdgeKind::Call).unwrap();
        graph.add_edge("src/a.py:A.f", "src/a.py:BASE", EdgeKind::Call).unwrap();
        graph.add_edge("src/a.py:A.f", "src/a.py:BASE", EdgeKind::Cluster).unwrap();
        assert_eq!(graph.edge_count(), before + 2);
        assert_eq!(graph.out_degree("src/a.py:A.f", None), 2);
        assert_eq!(graph.out_degree("src/a.py:A.f", Some(EdgeKind::Call)), 1);
        assert!(graph.add_edge("src/a.py:A.f", "missing", EdgeKind::Call).is_err());
    }

    #[test]
    fn test_add_node_replaces_in_place() {
        let mut graph = sample();
        graph.add_node(Node::file("src/a.py", "f2")).unwrap();
        assert_eq!(graph.node("src/a.py").unwrap().checksum.as_deref(), Some("f2"));
        assert_eq!(graph.out_degree("src/a.py", Some(EdgeKind::Hierarchy)), 2);
    }

    #[test]
    fn test_descendants_preorder() {
        let graph = sample();
        assert_eq!(
            ids(graph.descendants("src", EdgeKind::Hierarchy)),
            vec!["src/a.py", "src/a.py:BASE", "src/a.py:A", "src/a.py:A.f"]
        );
    }

    #[test]
    fn test_ancestors_and_file_of() {
        let graph = sample();
        assert_eq!(
            ids(graph.ancestors("src/a.py:A.f")),
            vec!["src/a.py:A", "src/a.py", "src", ROOT_ID]
        );
        assert_eq!(graph.file_of("src/a.py:A.f").unwrap().id, "src/a.py");
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = sample();
        graph.remove_node("src/a.py:A");
        assert!(!graph.contains("src/a.py:A"));
        assert_eq!(graph.in_degree("src/a.py:A.f", None), 0);
        assert_eq!(graph.out_degree("src/a.py", None), 1);
    }

    #[test]
    fn test_subgraph_keeps_internal_edges() {
        let graph = sample();
        let sub = graph.subgraph(["src/a.py", "src/a.py:A", "src/a.py:A.f"]);
        assert_eq!(sub.node_count(), 3);
        assert_eq!(sub.edge_count(), 2);
        assert_eq!(graph.component_of("src/a.py:A.f").len(), graph.node_count());
    }

    #[test]
    fn test_resolve_ref() {
        let graph = sample();
        let (node, lines) = graph.resolve_ref("src/a.py:2-3").unwrap();
        assert_eq!(node.id, "src/a.py");
        assert_eq!(lines.unwrap().len(), 2);

        let (node, lines) = graph.resolve_ref("src/a.py:A.f").unwrap();
        assert_eq!(node.id, "src/a.py:A.f");
        assert!(lines.is_none());

        assert!(matches!(
            graph.resolve_ref("nope.py:1"),
            Err(GraphError::NodeNotFound(_))
        ));
    }
}
