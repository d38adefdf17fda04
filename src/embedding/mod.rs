//! Text-to-vector embedding providers.
//!
//! The index only talks to the [`EmbeddingProvider`] trait; which concrete
//! provider backs it is decided once by [`create_provider`] from configuration.

pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::IndexError;

/// Turns text into fixed-width vectors.
///
/// Every vector returned by one provider has exactly [`dimensions`](Self::dimensions)
/// entries. Transport or auth failures surface as errors from `embed`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, one vector per input in input order.
    /// The default implementation calls [`embed`](Self::embed) sequentially;
    /// batches are not atomic.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Short provider family name, e.g. `"openai"`.
    fn provider_name(&self) -> &str;

    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;

    /// Width of the vectors this provider produces.
    fn dimensions(&self) -> usize;

    /// Stable key distinguishing provider configurations (endpoint, model) in the
    /// embedding cache.
    fn provider_key(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// Fails fast on an unknown provider name or a missing API key.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .map_err(|_| IndexError::MissingApiKey(config.api_key_env.clone()))?;
            let provider = openai::OpenAiEmbeddingProvider::new(api_key)
                .with_base_url(config.base_url.clone())
                .with_model(config.model.clone(), config.dimensions)
                .with_requested_dimensions(config.send_dimensions);
            Ok(Arc::new(provider))
        }
        other => Err(IndexError::UnsupportedProvider(other.to_string()).into()),
    }
}
