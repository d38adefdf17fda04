//! Embeddings over an OpenAI-compatible `/v1/embeddings` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::IndexError;

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
    /// Ask the endpoint to shorten vectors to `dims`. Servers that predate the
    /// `dimensions` parameter reject it, so it can be turned off.
    request_dims: bool,
    provider_key: String,
}

/// Cache key for an endpoint/model pair. The API key is left out so rotating
/// it keeps cached vectors valid.
fn provider_key_for(base_url: &str, model: &str) -> String {
    let digest = Sha256::new()
        .chain_update(b"openai:")
        .chain_update(base_url.as_bytes())
        .chain_update(b":")
        .chain_update(model.as_bytes())
        .finalize();
    format!("{digest:x}")[..16].to_string()
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: String) -> Self {
        let base_url = "https://api.openai.com".to_string();
        let model = "text-embedding-3-small".to_string();
        Self {
            client: reqwest::Client::new(),
            api_key: Secret::new(api_key),
            provider_key: provider_key_for(&base_url, &model),
            base_url,
            model,
            dims: 1536,
            request_dims: true,
        }
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self.provider_key = provider_key_for(&self.base_url, &self.model);
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self.provider_key = provider_key_for(&self.base_url, &self.model);
        self
    }

    pub fn with_requested_dimensions(mut self, enabled: bool) -> Self {
        self.request_dims = enabled;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Put each returned vector in the slot its `index` names, checking that every
/// input got exactly one vector of the expected width.
fn place_vectors(items: Vec<EmbeddingItem>, inputs: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    anyhow::ensure!(
        items.len() == inputs,
        "embedding count mismatch: sent {inputs}, received {}",
        items.len()
    );
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; inputs];
    for item in items {
        if item.embedding.len() != dims {
            return Err(IndexError::DimensionMismatch {
                configured: dims,
                reported: item.embedding.len(),
            }
            .into());
        }
        let slot = slots
            .get_mut(item.index)
            .with_context(|| format!("embedding index {} out of range for {inputs} inputs", item.index))?;
        anyhow::ensure!(slot.is_none(), "embedding index {} returned twice", item.index);
        *slot = Some(item.embedding);
    }
    // Every slot is filled: the counts match and no index repeats.
    Ok(slots.into_iter().flatten().collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .context("empty embedding response")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dims.then_some(self.dims),
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding provider returned an error status")?
            .json::<EmbeddingResponse>()
            .await
            .context("malformed embedding response")?;

        place_vectors(resp.data, texts.len(), self.dims)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }
}
