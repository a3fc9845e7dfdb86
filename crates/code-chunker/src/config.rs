use serde::{Deserialize, Serialize};

/// Configuration for chunk production
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Which producer drives proposals
    pub strategy: ChunkingStrategy,

    /// Lines per fixed window
    pub window_lines: usize,

    /// Lines per model generation request
    pub batch_lines: usize,

    /// Retries of the current batch before accepting as-is
    pub retry_budget: usize,

    /// Rollbacks into the previous batch across the whole file
    pub rollback_budget: usize,

    /// File extensions (without dot) that get chunked. Empty = all files.
    pub extensions: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::SyntaxTree,
            window_lines: 100,
            batch_lines: 800,
            retry_budget: 2,
            rollback_budget: 3,
            extensions: vec![],
        }
    }
}

impl ChunkerConfig {
    /// Config using fixed windows only
    #[must_use]
    pub fn windows(window_lines: usize) -> Self {
        Self {
            strategy: ChunkingStrategy::FixedWindow,
            window_lines,
            ..Default::default()
        }
    }

    /// Whether files with `ext` should be chunked at all
    #[must_use]
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.is_empty()
            || self
                .extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.window_lines == 0 {
            return Err("window_lines must be > 0".to_string());
        }
        if self.batch_lines == 0 {
            return Err("batch_lines must be > 0".to_string());
        }
        Ok(())
    }
}

/// Strategy for producing chunk proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Tree-sitter boundaries, falling back to windows when parsing fails
    SyntaxTree,

    /// Fixed line-count windows
    FixedWindow,

    /// Model-generated boundaries, batched and validated
    Generated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ChunkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_lines, 100);
        assert_eq!(config.batch_lines, 800);
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.rollback_budget, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::windows(0).validate().is_err());
        let config = ChunkerConfig {
            batch_lines: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extension_filter() {
        let config = ChunkerConfig {
            extensions: vec![".py".to_string(), "rs".to_string()],
            ..Default::default()
        };
        assert!(config.accepts_extension("py"));
        assert!(config.accepts_extension("RS"));
        assert!(!config.accepts_extension("md"));
        assert!(ChunkerConfig::default().accepts_extension("md"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ChunkerConfig =
            serde_json::from_str(r#"{"strategy":"fixed_window","window_lines":50}"#).unwrap();
        assert_eq!(config.strategy, ChunkingStrategy::FixedWindow);
        assert_eq!(config.window_lines, 50);
        assert_eq!(config.batch_lines, 800);
    }
}
