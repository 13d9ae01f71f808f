//! Text → embedding sources consumed by ingestion and search callers.

pub mod openai;

use anyhow::Result;

/// Turns text into a fixed-width embedding.
///
/// Implementations block; async callers should run them on `spawn_blocking`.
pub trait TextEmbedder: Send + Sync {
    /// Embeds a single string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
