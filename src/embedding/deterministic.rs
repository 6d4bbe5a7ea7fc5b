//! Hash-seeded deterministic embeddings.
//!
//! Maps text to a stable unit vector with no model call. Similar only to
//! identical text, so semantic quality is nil — but the vectors are
//! reproducible, which is what tests and air-gapped deployments need.

use anyhow::Result;
use async_trait::async_trait;

use super::{l2_normalize, truncate_chars, Embedding, EmbeddingProvider, MAX_EMBED_CHARS};

pub struct DeterministicEmbedder {
    dimensions: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let truncated = truncate_chars(text, MAX_EMBED_CHARS);
        let mut vector = Vec::with_capacity(self.dimensions);

        // xorshift stream seeded from an FNV-1a pass over the input.
        let mut state: u64 = 0xcbf29ce484222325;
        for byte in truncated.as_bytes() {
            state ^= *byte as u64;
            state = state.wrapping_mul(0x100000001b3);
        }
        if state == 0 {
            state = 0x9e3779b97f4a7c15;
        }
        for _ in 0..self.dimensions {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push((state >> 40) as f32 / 8388608.0 - 1.0);
        }

        l2_normalize(&mut vector);
        Ok(Embedding {
            dimensions: self.dimensions,
            vector,
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_same_vector() {
        let embedder = DeterministicEmbedder::new(64);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.dimensions, 64);
    }

    #[tokio::test]
    async fn different_text_different_vector() {
        let embedder = DeterministicEmbedder::new(64);
        let a = embedder.embed("alpha").await.unwrap();
        let b = embedder.embed("beta").await.unwrap();
        assert_ne!(a.vector, b.vector);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let embedder = DeterministicEmbedder::new(256);
        let e = embedder.embed("normalize me").await.unwrap();
        let norm: f32 = e.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embed_many_preserves_order() {
        let embedder = DeterministicEmbedder::new(32);
        let texts: Vec<String> = (0..25).map(|i| format!("text {i}")).collect();
        let batch = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(batch.len(), 25);
        for (i, text) in texts.iter().enumerate() {
            let single = embedder.embed(text).await.unwrap();
            assert_eq!(batch[i].vector, single.vector);
        }
    }
}
