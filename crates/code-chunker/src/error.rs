use thiserror::Error;

/// Result type for chunker operations
pub type Result<T> = std::result::Result<T, ChunkerError>;

/// Errors that can occur during chunk production and resolution
#[derive(Error, Debug)]
pub enum ChunkerError {
    /// Failed to parse the source code
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Unsupported language
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid chunk boundaries
    #[error("Invalid chunk boundaries for {id}: start={start}, end={end}, lines={line_count}")]
    InvalidBoundaries {
        id: String,
        start: usize,
        end: usize,
        line_count: usize,
    },

    /// Malformed line-range expression
    #[error("Invalid line ranges: {0}")]
    InvalidRanges(String),

    /// Model response failed validation and no retry budget remains
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Model endpoint failure (exhausted its own retry/timeout policy)
    #[error("Model error: {0}")]
    ModelError(String),

    /// Tree-sitter error
    #[error("Tree-sitter error: {0}")]
    TreeSitterError(String),
}

impl ChunkerError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create an unsupported language error
    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(lang.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitterError(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::ModelError(msg.into())
    }

    /// Whether the syntax-tree strategy failed in a way the caller should
    /// recover from by falling back to fixed windows.
    #[must_use]
    pub const fn is_recoverable_parse(&self) -> bool {
        matches!(
            self,
            Self::ParseError(_) | Self::UnsupportedLanguage(_) | Self::TreeSitterError(_)
        )
    }
}
