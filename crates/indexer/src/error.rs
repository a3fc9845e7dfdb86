use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph error: {0}")]
    Graph(#[from] repograph_graph::GraphError),

    #[error("Store error: {0}")]
    Store(#[from] repograph_store::StoreError),

    #[error("Chunker error: {0}")]
    Chunker(#[from] repograph_chunker::ChunkerError),

    /// An annotator found a node without an input it depends on
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Invalid diff: {0}")]
    Diff(String),

    #[error("Update cancelled")]
    Cancelled,

    #[error("Invalid project path: {0}")]
    InvalidPath(String),
}

impl IndexerError {
    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
