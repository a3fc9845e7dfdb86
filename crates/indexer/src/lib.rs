//! # repograph indexer
//!
//! Keeps a repository's knowledge graph and document store in step with the
//! working tree.
//!
//! ## Pipeline
//!
//! ```text
//! Working tree
//!     │
//!     ├──> HierarchyAnnotator (.gitignore aware scan)
//!     │      └─> directory/file nodes, file documents
//!     │
//!     ├──> ChunkAnnotator (syntax tree / windows / model)
//!     │      └─> chunk nodes, chunk documents
//!     │
//!     ├──> CallAnnotator ──> call edges
//!     ├──> DiffAnnotator (git diff <ref>) ──> diff node + hunk chunks
//!     └──> SummaryAnnotator (model, checksum-gated)
//!            └─> .repograph/{graph.json, store.json}
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use repograph_indexer::{Daemon, DaemonConfig};
//!
//! #[tokio::main]
//! async fn main() -> repograph_indexer::Result<()> {
//!     let daemon = Daemon::open("/path/to/project", DaemonConfig::default(), None).await?;
//!     let report = daemon.update(false).await?;
//!
//!     println!("{} nodes, {} edges", report.nodes, report.edges);
//!     Ok(())
//! }
//! ```

mod annotator;
mod calls;
mod chunks;
mod daemon;
pub mod diff;
mod error;
mod hierarchy;
mod limits;
mod model_client;
mod scanner;
mod summary;

pub use annotator::Annotator;
pub use calls::CallAnnotator;
pub use chunks::ChunkAnnotator;
pub use daemon::{open_store, Daemon, DaemonConfig, StoreBackend, UpdateReport, WatchState};
pub use diff::{diff_node_id, map_diff, parse_unified_diff, DiffAnnotator, DiffHunk, DiffMapping, MappedHunk};
pub use error::{IndexerError, Result};
pub use hierarchy::{files_checksum, HierarchyAnnotator};
pub use limits::{
    acquire_model_permit, model_concurrency_snapshot, ModelConcurrencySnapshot, ModelPermit,
    DEFAULT_MODEL_CONCURRENCY,
};
pub use model_client::{HttpModelClient, ModelConfig};
pub use scanner::{relative_id, FileScanner, ScannedFile};
pub use summary::SummaryAnnotator;
