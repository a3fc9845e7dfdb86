//! Seam between chunk/summary generation and whatever serves completions.

use crate::error::Result;
use async_trait::async_trait;

/// A text-completion backend.
///
/// Implementations own their timeout and retry policy; an `Err` means those
/// are exhausted and surfaces as [`crate::ChunkerError::ModelError`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the model name for logging.
    fn name(&self) -> &str;

    /// Complete `prompt` under the instructions in `system`.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}
