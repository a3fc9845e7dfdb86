//! # repograph chunker
//!
//! Decomposes a source file into a hierarchy of non-overlapping line ranges.
//!
//! ## Architecture
//!
//! ```text
//! Source file
//!     │
//!     ├──> Producer (proposes raw, possibly nested ranges)
//!     │    ├─> AstProducer        tree-sitter definitions, dotted ids
//!     │    ├─> WindowProducer     fixed N-line windows
//!     │    └─> GeneratedProducer  model JSON, batched and validated
//!     │
//!     ├──> validate_proposal (drop out-of-file / foreign ids)
//!     │
//!     └──> resolve
//!          ├─> longest id first, extend over children, subtract them
//!          └─> BASE takes every unclaimed line
//! ```
//!
//! Every line of the file ends up in exactly one chunk.
//!
//! ## Example
//!
//! ```rust
//! use repograph_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let code = "import os\n\ndef main():\n    return 1\n";
//!
//! let file = chunker.chunk_str("app.py", code).unwrap();
//! for chunk in &file.chunks {
//!     println!("{} -> {}", chunk.id, chunk.reference);
//! }
//! ```

mod ast_analyzer;
mod chunker;
mod config;
mod error;
mod generated;
mod language;
mod model;
pub mod ranges;
pub mod resolver;
mod strategy;
mod types;

pub use ast_analyzer::{AstAnalyzer, AstProducer, CallSite};
pub use chunker::Chunker;
pub use config::{ChunkerConfig, ChunkingStrategy};
pub use error::{ChunkerError, Result};
pub use generated::{validate_batch, BatchContext, GeneratedProducer, ValidationOutcome};
pub use language::Language;
pub use model::ModelClient;
pub use ranges::{
    compress_ranges, count_lines, is_range_expr, line_span, parse_ranges, slice_lines, ChunkRef, LineSet,
};
pub use resolver::{parent_of, resolve};
pub use strategy::{ChunkProducer, WindowProducer};
pub use types::{
    base_id, estimate_tokens, file_of, local_name, ChunkProposal, ChunkSource, FileChunks,
    ResolvedChunk, BASE_SEGMENT,
};
