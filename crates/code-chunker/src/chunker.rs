use crate::ast_analyzer::AstProducer;
use crate::config::{ChunkerConfig, ChunkingStrategy};
use crate::error::{ChunkerError, Result};
use crate::generated::GeneratedProducer;
use crate::model::ModelClient;
use crate::ranges::count_lines;
use crate::resolver::{resolve, retain_valid};
use crate::strategy::{ChunkProducer, WindowProducer};
use crate::types::{ChunkProposal, ChunkSource, FileChunks};
use std::sync::Arc;

/// Main chunker interface: picks a producer, recovers from its failures and
/// resolves the proposals into a partition.
pub struct Chunker {
    config: ChunkerConfig,
    windows: WindowProducer,
    generated: Option<GeneratedProducer>,
}

impl Chunker {
    /// Create a new chunker with configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate().map_err(ChunkerError::invalid_config)?;
        Ok(Self {
            windows: WindowProducer::new(config.window_lines),
            config,
            generated: None,
        })
    }

    /// Attach a model client for the generated strategy
    #[must_use]
    pub fn with_model(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.generated = Some(GeneratedProducer::new(client, &self.config));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk with the synchronous strategies only.
    ///
    /// The syntax-tree strategy falls back to fixed windows on unsupported or
    /// unparsable input.
    pub fn chunk_str(&self, path: &str, text: &str) -> Result<FileChunks> {
        let (source, proposals) = match self.config.strategy {
            ChunkingStrategy::FixedWindow => self.propose_windows(path, text)?,
            ChunkingStrategy::SyntaxTree | ChunkingStrategy::Generated => {
                self.propose_syntax_tree(path, text)?
            }
        };
        Ok(Self::finish(path, text, source, proposals))
    }

    /// Chunk with the configured strategy, including model generation.
    ///
    /// A failing model falls back to [`Chunker::chunk_str`].
    pub async fn chunk(&self, path: &str, text: &str) -> Result<FileChunks> {
        if self.config.strategy == ChunkingStrategy::Generated {
            if let Some(generated) = &self.generated {
                match generated.propose(path, text).await {
                    Ok(proposals) => {
                        return Ok(Self::finish(path, text, ChunkSource::Generated, proposals));
                    }
                    Err(err) => log::warn!("{path}: model chunking failed, falling back: {err}"),
                }
            } else {
                log::debug!("{path}: no model configured, using syntax-tree chunking");
            }
        }
        self.chunk_str(path, text)
    }

    fn propose_syntax_tree(&self, path: &str, text: &str) -> Result<(ChunkSource, Vec<ChunkProposal>)> {
        match AstProducer.propose(path, text) {
            Ok(proposals) => Ok((ChunkSource::SyntaxTree, proposals)),
            Err(err) if err.is_recoverable_parse() => {
                log::debug!("{path}: {err}; falling back to fixed windows");
                self.propose_windows(path, text)
            }
            Err(err) => Err(err),
        }
    }

    fn propose_windows(&self, path: &str, text: &str) -> Result<(ChunkSource, Vec<ChunkProposal>)> {
        Ok((self.windows.source(), self.windows.propose(path, text)?))
    }

    fn finish(path: &str, text: &str, source: ChunkSource, proposals: Vec<ChunkProposal>) -> FileChunks {
        let line_count = count_lines(text);
        let proposals = retain_valid(path, line_count, proposals);
        FileChunks {
            path: path.to_string(),
            source,
            chunks: resolve(path, line_count, &proposals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Chunker::new(ChunkerConfig::windows(0)).is_err());
    }

    #[test]
    fn test_unsupported_language_falls_back_to_windows() {
        let chunker = Chunker::new(ChunkerConfig {
            window_lines: 2,
            ..Default::default()
        })
        .unwrap();
        let out = chunker.chunk_str("notes.txt", "a\nb\nc\n").unwrap();
        assert_eq!(out.source, ChunkSource::FixedWindow);
        let refs: Vec<&str> = out.chunks.iter().map(|c| c.reference.as_str()).collect();
        assert_eq!(refs, vec!["notes.txt:1-2", "notes.txt:3"]);
    }

    #[tokio::test]
    async fn test_generated_without_model_uses_syntax_tree() {
        let chunker = Chunker::new(ChunkerConfig {
            strategy: ChunkingStrategy::Generated,
            ..Default::default()
        })
        .unwrap();
        let out = chunker.chunk("a.py", "def f():\n    pass\n").await.unwrap();
        assert_eq!(out.source, ChunkSource::SyntaxTree);
        assert_eq!(out.chunks.len(), 2);
    }
}
