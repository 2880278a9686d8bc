use crate::chunking::{estimate_token_count, TextChunk};
use crate::error::RagError;
use crate::providers::Embedding;
use crate::vector_store::{check_batch, get_collection_name, ScoredChunk, VectorStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use qdrant_client::qdrant::{
    with_payload_selector, Condition, CountPointsBuilder, CreateCollectionBuilder,
    DeletePointsBuilder, Distance, Filter, PointStruct, SearchPoints, UpsertPointsBuilder,
    VectorParams, WithPayloadSelector,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use std::env;

/// Configuration for Qdrant
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL").context("Missing QDRANT_URL")?;
        let api_key = env::var("QDRANT_API_KEY").ok();

        Ok(QdrantConfig { url, api_key })
    }
}

/// Vector store backed by a Qdrant server
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(QdrantStore { client })
    }
}

fn is_not_found(err: &QdrantError) -> bool {
    matches!(err, QdrantError::ResponseError { status } if status.code() == tonic::Code::NotFound)
}

fn source_file_filter(source_file: &str) -> Filter {
    Filter::must([Condition::matches("source_file", source_file.to_string())])
}

/// Stable 64-bit point id for a chunk id (FNV-1a)
fn point_id(chunk_id: &str) -> u64 {
    chunk_id.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

fn payload_json(chunk: &TextChunk) -> serde_json::Value {
    json!({
        "id": chunk.id,
        "text": chunk.text,
        "source_file": chunk.source_file,
        "page": chunk.page,
        "chunk_index": chunk.chunk_index,
        "start_position": chunk.start_position,
    })
}

fn chunk_payload(chunk: &TextChunk) -> Result<Payload> {
    let payload = Payload::try_from(payload_json(chunk))
        .map_err(|e| RagError::VectorStore(e.to_string()))?;
    Ok(payload)
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, corpus: &str) -> Result<bool> {
        let collection_name = get_collection_name(corpus);

        match self.client.collection_info(&collection_name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(RagError::VectorStore(format!(
                "Failed to check collection existence: {}",
                e
            ))
            .into()),
        }
    }

    async fn create_collection(&self, corpus: &str, dimension: u64) -> Result<()> {
        let collection_name = get_collection_name(corpus);

        let create_collection = CreateCollectionBuilder::new(collection_name.clone())
            .vectors_config(VectorParams {
                size: dimension,
                distance: Distance::Cosine.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))
            .with_context(|| format!("Failed to create collection {}", collection_name))?;
        info!(
            "Created Qdrant collection {} ({} dimensions)",
            collection_name, dimension
        );

        Ok(())
    }

    async fn delete_collection(&self, corpus: &str) -> Result<()> {
        let collection_name = get_collection_name(corpus);

        match self.client.delete_collection(collection_name.clone()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(RagError::VectorStore(e.to_string()))
                .with_context(|| format!("Failed to delete collection {}", collection_name)),
        }
    }

    async fn store_chunks(
        &self,
        corpus: &str,
        chunks: &[TextChunk],
        embeddings: Vec<Embedding>,
    ) -> Result<()> {
        check_batch(chunks, &embeddings)?;
        let collection_name = get_collection_name(corpus);

        // Convert chunks and embeddings to points
        let points = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                Ok(PointStruct::new(
                    point_id(&chunk.id),
                    embedding.values,
                    chunk_payload(chunk)?,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        let upsert_request = UpsertPointsBuilder::new(collection_name.clone(), points)
            .wait(true)
            .build();

        // Upsert points in batch
        self.client
            .upsert_points(upsert_request)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))
            .with_context(|| format!("Failed to upsert points in collection {}", collection_name))?;

        Ok(())
    }

    async fn delete_document(&self, corpus: &str, source_file: &str) -> Result<()> {
        let collection_name = get_collection_name(corpus);

        let request = DeletePointsBuilder::new(collection_name.clone())
            .points(source_file_filter(source_file))
            .wait(true);

        self.client
            .delete_points(request)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))
            .with_context(|| {
                format!(
                    "Failed to delete {} from collection {}",
                    source_file, collection_name
                )
            })?;

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &Embedding,
        corpus: &str,
        limit: u64,
        source_file: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let collection_name = get_collection_name(corpus);

        // Create search request
        let search_request = SearchPoints {
            collection_name: collection_name.clone(),
            vector: query_embedding.values.clone(),
            limit,
            filter: source_file.map(source_file_filter),
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        // Execute search
        let search_response = match self.client.search_points(search_request).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => {
                return Err(RagError::CollectionNotFound(corpus.to_string()).into())
            }
            Err(e) => {
                return Err(RagError::VectorStore(e.to_string()))
                    .with_context(|| format!("Failed to search collection {}", collection_name))
            }
        };
        debug!(
            "Qdrant returned {} points from {}",
            search_response.result.len(),
            collection_name
        );

        // Convert search results back to chunks
        let chunks = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let payload = scored_point.payload;
                let text = payload.get("text")?.as_str()?.to_string();
                let source_file = payload
                    .get("source_file")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| corpus.to_string());
                let integer = |key: &str| payload.get(key).and_then(|v| v.as_integer()).unwrap_or(0);
                let chunk_index = integer("chunk_index") as usize;
                let id = payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| TextChunk::make_id(&source_file, chunk_index));

                Some(ScoredChunk {
                    chunk: TextChunk {
                        id,
                        token_count: estimate_token_count(&text),
                        text,
                        source_file,
                        page: integer("page") as u32,
                        chunk_index,
                        start_position: integer("start_position") as usize,
                    },
                    score: scored_point.score,
                })
            })
            .collect();

        Ok(chunks)
    }

    async fn count(&self, corpus: &str) -> Result<u64> {
        let collection_name = get_collection_name(corpus);

        let response = self
            .client
            .count(CountPointsBuilder::new(collection_name.clone()).exact(true))
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))
            .with_context(|| format!("Failed to count points in {}", collection_name))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ids_are_stable_and_distinct() {
        assert_eq!(point_id("paper.pdf#0"), point_id("paper.pdf#0"));
        assert_ne!(point_id("paper.pdf#0"), point_id("paper.pdf#1"));
        assert_ne!(point_id("a.pdf#0"), point_id("b.pdf#0"));
    }

    #[test]
    fn test_chunk_payload_fields() {
        let chunk = TextChunk {
            id: "paper.pdf#3".to_string(),
            text: "Transformers use attention.".to_string(),
            token_count: 4,
            source_file: "paper.pdf".to_string(),
            page: 2,
            chunk_index: 3,
            start_position: 120,
        };

        let payload = payload_json(&chunk);

        assert_eq!(payload["id"], "paper.pdf#3");
        assert_eq!(payload["source_file"], "paper.pdf");
        assert_eq!(payload["page"], 2);
        assert_eq!(payload["chunk_index"], 3);
        assert_eq!(payload["start_position"], 120);
        assert!(chunk_payload(&chunk).is_ok());
    }
}
