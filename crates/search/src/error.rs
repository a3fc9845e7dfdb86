use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] repograph_store::StoreError),

    #[error("Graph error: {0}")]
    Graph(#[from] repograph_graph::GraphError),

    #[error("Empty query")]
    EmptyQuery,

    #[error("Invalid ref: {0}")]
    InvalidRef(String),

    /// Directories have no text of their own
    #[error("{0} has no text to quote")]
    NoText(String),

    /// A node's text is not in the store
    #[error("No stored document for {0}")]
    MissingDocument(String),
}
