use crate::error::RagError;
use crate::providers::{Embedder, Embedding};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Batching and retry parameters for embedding calls
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingConfig {
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            batch_size: 20,
            delay_between_batches: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Rate-limited wrapper around an embedding provider
#[derive(Clone)]
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, config: EmbeddingConfig) -> Self {
        EmbeddingService { embedder, config }
    }

    /// Embed document chunks in batches, pausing between batches
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let batch_size = self.config.batch_size.max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
            debug!(
                "Embedding batch {}/{} ({} texts)",
                batch_idx + 1,
                total_batches,
                batch.len()
            );
            let batch_embeddings = self
                .call_with_retry(batch)
                .await
                .with_context(|| format!("Failed to embed batch {}/{}", batch_idx + 1, total_batches))?;
            embeddings.extend(batch_embeddings);

            if batch_idx + 1 < total_batches && !self.config.delay_between_batches.is_zero() {
                tokio::time::sleep(self.config.delay_between_batches).await;
            }
        }

        info!(
            "Generated {} embeddings with {}",
            embeddings.len(),
            self.embedder.model()
        );
        Ok(embeddings)
    }

    /// Embed a single query string
    pub async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = self.call_with_retry(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| RagError::MalformedResponse("empty embedding response".to_string()).into())
    }

    async fn call_with_retry(&self, batch: &[String]) -> Result<Vec<Embedding>> {
        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.embedder.embed(batch).await {
                Ok(embeddings) if embeddings.len() == batch.len() => return Ok(embeddings),
                Ok(embeddings) => {
                    return Err(RagError::MalformedResponse(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        embeddings.len()
                    ))
                    .into())
                }
                Err(e) => {
                    let retryable = e
                        .downcast_ref::<RagError>()
                        .is_some_and(RagError::is_retryable);
                    if !retryable || attempt >= max_retries {
                        return Err(e);
                    }

                    let wait = self.config.retry_delay * attempt;
                    warn!(
                        "Embedding request failed ({}), retrying in {:?} ({}/{})",
                        e, wait, attempt, max_retries
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
