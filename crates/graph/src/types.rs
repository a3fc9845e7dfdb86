use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Id of the single root directory node
pub const ROOT_ID: &str = "ROOT";

/// Kind of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
    Chunk,
    Diff,
}

impl NodeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::Chunk => "chunk",
            Self::Diff => "diff",
        }
    }

    /// Whether nodes of this kind must carry a content checksum
    #[must_use]
    pub const fn requires_checksum(self) -> bool {
        !matches!(self, Self::Directory)
    }
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "directory" => Ok(Self::Directory),
            "file" => Ok(Self::File),
            "chunk" => Ok(Self::Chunk),
            "diff" => Ok(Self::Diff),
            other => Err(GraphError::schema(format!("unknown node type '{other}'"))),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a graph edge. Several kinds may join the same pair of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Structural containment: directory -> file -> chunk
    Hierarchy,
    /// Caller chunk -> callee chunk
    Call,
    /// Diff hunk -> touched file or chunk
    Diff,
    Cluster,
}

impl EdgeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hierarchy => "hierarchy",
            Self::Call => "call",
            Self::Diff => "diff",
            Self::Cluster => "cluster",
        }
    }
}

impl FromStr for EdgeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hierarchy" => Ok(Self::Hierarchy),
            "call" => Ok(Self::Call),
            "diff" => Ok(Self::Diff),
            "cluster" => Ok(Self::Cluster),
            other => Err(GraphError::schema(format!("unknown edge type '{other}'"))),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate structural child of a file or diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLink {
    pub id: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Cached natural-language description, valid while `checksum` matches the
/// hash of the inputs it was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub checksum: String,
}

/// Edge weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub kind: EdgeKind,
}

/// Unvalidated node attributes, as found in a node-link document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttrs {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_checksum: Option<String>,
}

/// A validated graph node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// `path[:ranges]` locator of the node's text
    pub reference: String,
    pub checksum: Option<String>,
    /// Transient scope flag; never persisted
    pub active: bool,
    pub chunks: Vec<ChunkLink>,
    pub summary: Option<Summary>,
    /// Last observed modification time of a file
    pub mtime_ms: Option<u64>,
    /// Set when a file could not be read; such files stay out of scope
    pub error: Option<String>,
    /// File checksum the current chunk set was generated from
    pub chunks_checksum: Option<String>,
}

impl Node {
    fn bare(id: impl Into<String>, kind: NodeKind, reference: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            reference: reference.into(),
            checksum: None,
            active: false,
            chunks: Vec::new(),
            summary: None,
            mtime_ms: None,
            error: None,
            chunks_checksum: None,
        }
    }

    #[must_use]
    pub fn directory(id: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::bare(id, NodeKind::Directory, reference)
    }

    #[must_use]
    pub fn file(id: impl Into<String>, checksum: impl Into<String>) -> Self {
        let id = id.into();
        let mut node = Self::bare(id.clone(), NodeKind::File, id);
        node.checksum = Some(checksum.into());
        node
    }

    /// A file that could not be read
    #[must_use]
    pub fn errored_file(id: impl Into<String>, error: impl Into<String>) -> Self {
        let id = id.into();
        let mut node = Self::bare(id.clone(), NodeKind::File, id);
        node.error = Some(error.into());
        node
    }

    #[must_use]
    pub fn chunk(
        id: impl Into<String>,
        reference: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        let mut node = Self::bare(id, NodeKind::Chunk, reference);
        node.checksum = Some(checksum.into());
        node
    }

    #[must_use]
    pub fn diff(
        id: impl Into<String>,
        reference: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        let mut node = Self::bare(id, NodeKind::Diff, reference);
        node.checksum = Some(checksum.into());
        node
    }

    /// Check required fields for the node's kind
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(GraphError::schema("node without id"));
        }
        if self.reference.is_empty() {
            return Err(GraphError::schema(format!(
                "{} node '{}' has no ref",
                self.kind, self.id
            )));
        }
        if self.kind.requires_checksum() && self.checksum.is_none() && self.error.is_none() {
            return Err(GraphError::schema(format!(
                "{} node '{}' has no checksum",
                self.kind, self.id
            )));
        }
        Ok(())
    }

    /// Build and validate a node from raw attributes
    pub fn from_attrs(id: impl Into<String>, attrs: NodeAttrs) -> Result<Self> {
        let id = id.into();
        let kind: NodeKind = attrs
            .kind
            .as_deref()
            .ok_or_else(|| GraphError::schema(format!("node '{id}' has no type")))?
            .parse()?;
        let node = Self {
            reference: attrs.reference.unwrap_or_default(),
            checksum: attrs.checksum,
            active: false,
            chunks: attrs.chunks,
            summary: attrs.summary,
            mtime_ms: attrs.mtime_ms,
            error: attrs.error,
            chunks_checksum: attrs.chunks_checksum,
            id,
            kind,
        };
        node.validate()?;
        Ok(node)
    }

    /// Attributes for serialization. `active` is deliberately absent.
    #[must_use]
    pub fn to_attrs(&self) -> NodeAttrs {
        NodeAttrs {
            kind: Some(self.kind.as_str().to_string()),
            reference: Some(self.reference.clone()),
            checksum: self.checksum.clone(),
            chunks: self.chunks.clone(),
            summary: self.summary.clone(),
            mtime_ms: self.mtime_ms,
            error: self.error.clone(),
            chunks_checksum: self.chunks_checksum.clone(),
        }
    }

    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}
