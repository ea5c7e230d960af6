//! OpenAI-compatible embedding client with retry

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::embedding::{EmbeddingProvider, IndexedEmbedding};

/// Client for `/embeddings`-style batch APIs
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        }
    }

    /// Retry with exponential backoff and a fixed attempt cap; exhausting
    /// retries is terminal and surfaces as a provider failure.
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let delay = Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            "Embedding request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            self.max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(Error::provider(format!(
            "embedding retries exhausted: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let body: EmbeddingResponse = response.json().await?;

        Ok(body
            .data
            .into_iter()
            .map(|item| IndexedEmbedding {
                index: item.index,
                embedding: item.embedding,
            })
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry_request(|| self.request_embeddings(texts)).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}
