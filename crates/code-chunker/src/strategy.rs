use crate::error::Result;
use crate::ranges::count_lines;
use crate::types::{ChunkProposal, ChunkSource};

/// A synchronous source of raw chunk proposals for one file.
///
/// Producers only propose; overlap and coverage are settled by
/// [`crate::resolver::resolve`].
pub trait ChunkProducer: Send + Sync {
    /// Which strategy this producer implements
    fn source(&self) -> ChunkSource;

    /// Propose chunks for `text`, the full contents of `path`
    fn propose(&self, path: &str, text: &str) -> Result<Vec<ChunkProposal>>;
}

/// Fixed-size line windows.
///
/// The first window is never proposed: it stays with BASE so every file
/// keeps a baseline chunk that precedes the windows.
#[derive(Debug, Clone, Copy)]
pub struct WindowProducer {
    window_lines: usize,
}

impl WindowProducer {
    #[must_use]
    pub const fn new(window_lines: usize) -> Self {
        Self {
            window_lines: if window_lines == 0 { 1 } else { window_lines },
        }
    }

    #[must_use]
    pub const fn window_lines(&self) -> usize {
        self.window_lines
    }
}

impl Default for WindowProducer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ChunkProducer for WindowProducer {
    fn source(&self) -> ChunkSource {
        ChunkSource::FixedWindow
    }

    fn propose(&self, path: &str, text: &str) -> Result<Vec<ChunkProposal>> {
        let line_count = count_lines(text);
        let mut proposals = Vec::new();
        let mut window = 1;
        let mut start = self.window_lines + 1;

        while start <= line_count {
            let end = (start + self.window_lines - 1).min(line_count);
            proposals.push(ChunkProposal::new(
                format!("{path}:window_{window}"),
                start,
                end,
            ));
            window += 1;
            start = end + 1;
        }

        Ok(proposals)
    }
}
