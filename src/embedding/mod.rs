//! Text-to-vector embedding providers.
//!
//! Implementations produce L2-normalized vectors of a fixed dimension.
//! Input is truncated to the model context cap before embedding.

pub mod deterministic;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;

/// Model context cap: input beyond this many characters is dropped.
pub const MAX_EMBED_CHARS: usize = 32_000;

/// Batch size used by [`EmbeddingProvider::embed_many`].
pub const EMBED_BATCH_SIZE: usize = 10;

/// A unit-length embedding vector.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimensions: usize,
}

/// Trait for embedding text into unit vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string. Input longer than [`MAX_EMBED_CHARS`]
    /// is truncated before the model sees it.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch, preserving input order. The default processes
    /// groups of [`EMBED_BATCH_SIZE`] sequentially; implementations with
    /// a batch endpoint may override per group.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for group in texts.chunks(EMBED_BATCH_SIZE) {
            for text in group {
                out.push(self.embed(text).await?);
            }
        }
        Ok(out)
    }

    /// The number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "remote" => Ok(Box::new(remote::RemoteEmbedder::new(config)?)),
        "deterministic" => Ok(Box::new(deterministic::DeterministicEmbedder::new(
            config.dimensions,
        ))),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: remote, deterministic"),
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Scale a vector to unit L2 length. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // multibyte: é is 2 bytes, truncation counts chars not bytes
        assert_eq!(truncate_chars("ééééé", 2), "éé");
    }

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
