//! # repograph search
//!
//! Retrieval over a built repository graph: ranked search scoped to the
//! nodes the graph currently holds, and token-budgeted context for a node.
//!
//! ## Architecture
//!
//! ```text
//! search(query)
//!     ├──> checksums of every readable node in the graph
//!     ├──> store.scoped_query (active flags set only for the call)
//!     └──> hits expanded back to every node sharing a checksum
//!
//! assemble_node_context(node, budget)
//!     ├──> chunk:  ContextBuilder <── parent chunks, callees, callers, diffs
//!     ├──> file / directory: tree + child summaries
//!     └──> document first, context gets the remaining budget
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use repograph_graph::RepoGraph;
//! use repograph_search::{assemble_node_context, search};
//! use repograph_store::{LexicalStore, SharedStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> repograph_search::Result<()> {
//!     let graph = RepoGraph::load(".repograph/graph.json").await?;
//!     let store: SharedStore = Arc::new(LexicalStore::open(".repograph/store.json").await?);
//!
//!     for hit in search("parse config", &graph, &store, 5).await? {
//!         let ctx = assemble_node_context(&graph, &store, &hit.id, 2000).await?;
//!         println!("{}", ctx.render());
//!     }
//!     Ok(())
//! }
//! ```

mod assemble;
mod context;
mod error;
mod search;

pub use assemble::{assemble_node_context, NodeContext, CHARS_PER_TOKEN};
pub use context::{fetch_document, ContextBuilder};
pub use error::{Result, SearchError};
pub use search::{search, SearchHit};
