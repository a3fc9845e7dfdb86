//! # repograph store
//!
//! Content-addressed document store: every record is keyed by the sha256 of
//! its text, so identical chunks across files and runs share one record.
//!
//! ## Architecture
//!
//! ```text
//! add(checksums, documents, metadatas)
//!     │
//!     ├──> Records (insert-or-merge, last-write-wins metadata, insertion seq)
//!     │
//!     ├──> LexicalStore   tf x idf over the candidate set
//!     └──> VectorStore    HashedEmbedder ──> VectorIndex (cosine)
//!
//! scoped_query(text, ids)
//!     └──> [scope mutex] set_active ──> query(active) ──> unset_active
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use repograph_store::{checksum, DocumentStore, LexicalStore};
//!
//! #[tokio::main]
//! async fn main() -> repograph_store::Result<()> {
//!     let store = LexicalStore::new();
//!     let text = "def parse_config(path): ...".to_string();
//!     let id = checksum(&text);
//!     store.add(vec![id.clone()], vec![text], vec![]).await?;
//!
//!     for hit in store.scoped_query("config", &[id], 5).await? {
//!         println!("{} {:.3}", hit.checksum, hit.distance);
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod index;
mod lexical;
pub mod paths;
mod store;
mod types;
mod vector;

pub use embeddings::{Embedder, HashedEmbedder, DEFAULT_DIMENSION};
pub use error::{Result, StoreError};
pub use index::{cosine_similarity, VectorIndex};
pub use lexical::LexicalStore;
pub use store::{DocumentStore, SharedStore, STORE_SCHEMA_VERSION};
pub use types::{checksum, checksum_parts, GetResult, Include, Metadata, QueryHit, StoredRecord};
pub use vector::VectorStore;
