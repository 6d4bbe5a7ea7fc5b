//! HTTP embedding client for OpenAI-compatible embedding endpoints.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    l2_normalize, truncate_chars, Embedding, EmbeddingProvider, EMBED_BATCH_SIZE,
    MAX_EMBED_CHARS,
};
use crate::config::EmbeddingConfig;

pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("embedding api_key is required for the remote provider");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    /// One POST for a group of inputs; response vectors come back in
    /// request order.
    async fn embed_group(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("embedding request failed")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            bail!("embedding endpoint returned {status}: {body}");
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        if parsed.data.len() != texts.len() {
            bail!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            );
        }

        parsed
            .data
            .into_iter()
            .map(|row| {
                let mut vector = row.embedding;
                if vector.len() != self.dimensions {
                    bail!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.dimensions,
                        vector.len()
                    );
                }
                // Upstream models usually normalize; enforce it regardless.
                l2_normalize(&mut vector);
                Ok(Embedding {
                    dimensions: vector.len(),
                    vector,
                })
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let truncated = truncate_chars(text, MAX_EMBED_CHARS);
        let mut vectors = self.embed_group(&[truncated]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding response was empty"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for group in texts.chunks(EMBED_BATCH_SIZE) {
            let truncated: Vec<&str> = group
                .iter()
                .map(|t| truncate_chars(t, MAX_EMBED_CHARS))
                .collect();
            out.extend(self.embed_group(&truncated).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}
