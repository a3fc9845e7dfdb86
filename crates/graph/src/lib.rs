//! # repograph graph
//!
//! Typed, multi-edge knowledge graph of a repository.
//!
//! ## Architecture
//!
//! ```text
//! ROOT (directory)
//!   └─hierarchy─> src (directory)
//!                   └─hierarchy─> src/a.py (file)
//!                                   └─hierarchy─> src/a.py:BASE (chunk)
//!                                                   └─hierarchy─> src/a.py:A (chunk) ─call─> ...
//! diff:HEAD (diff) ─hierarchy─> diff:HEAD:src/a.py:1-5 (chunk) ─diff─> src/a.py:A
//! ```
//!
//! Nodes carry a `ref` (`path[:ranges]`) and a content checksum that keys the
//! document store. The graph persists as a node-link JSON document.

mod error;
mod graph;
mod persist;
mod types;

pub use error::{GraphError, Result};
pub use graph::{GraphMeta, RepoGraph};
pub use persist::{NodeLink, NodeLinkEdge, NodeLinkNode};
pub use types::{ChunkLink, Edge, EdgeKind, Node, NodeAttrs, NodeKind, Summary, ROOT_ID};
