use crate::chunking::TextChunk;
use crate::error::RagError;
use crate::providers::Embedding;
use crate::vector_store::{
    check_batch, cosine_similarity, get_collection_name, ScoredChunk, VectorStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    collections: BTreeMap<String, Collection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Collection {
    dimension: u64,
    points: Vec<StoredPoint>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPoint {
    chunk: TextChunk,
    vector: Vec<f32>,
}

/// Brute-force vector store persisted as a single JSON file
pub struct LocalStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl LocalStore {
    /// Open the store at `path`, loading existing collections if the file exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let raw = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_slice(&raw)
                .map_err(|e| RagError::VectorStore(e.to_string()))
                .with_context(|| format!("Corrupt vector store file {}", path.display()))?
        } else {
            StoreData::default()
        };
        debug!(
            "Opened local vector store {} ({} collections)",
            path.display(),
            data.collections.len()
        );

        Ok(LocalStore {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// A store that never touches disk
    pub fn in_memory() -> Self {
        LocalStore {
            path: None,
            data: RwLock::new(StoreData::default()),
        }
    }

    async fn persist(&self, data: &StoreData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_vec(data).map_err(|e| RagError::VectorStore(e.to_string()))?;
        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn collection_exists(&self, corpus: &str) -> Result<bool> {
        let data = self.data.read().await;
        Ok(data.collections.contains_key(&get_collection_name(corpus)))
    }

    async fn create_collection(&self, corpus: &str, dimension: u64) -> Result<()> {
        let mut data = self.data.write().await;
        data.collections.insert(
            get_collection_name(corpus),
            Collection {
                dimension,
                points: Vec::new(),
            },
        );
        info!(
            "Created local collection {} ({} dimensions)",
            get_collection_name(corpus),
            dimension
        );
        self.persist(&data).await
    }

    async fn delete_collection(&self, corpus: &str) -> Result<()> {
        let mut data = self.data.write().await;
        if data.collections.remove(&get_collection_name(corpus)).is_some() {
            self.persist(&data).await?;
        }
        Ok(())
    }

    async fn store_chunks(
        &self,
        corpus: &str,
        chunks: &[TextChunk],
        embeddings: Vec<Embedding>,
    ) -> Result<()> {
        let mut data = self.data.write().await;
        let collection = data
            .collections
            .get_mut(&get_collection_name(corpus))
            .ok_or_else(|| RagError::CollectionNotFound(corpus.to_string()))?;

        check_batch(chunks, &embeddings)?;
        if let Some((chunk, embedding)) = chunks
            .iter()
            .zip(&embeddings)
            .find(|(_, e)| e.dimension() as u64 != collection.dimension)
        {
            return Err(RagError::VectorStore(format!(
                "embedding for {} has {} dimensions, collection expects {}",
                chunk.id,
                embedding.dimension(),
                collection.dimension
            ))
            .into());
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            // Same chunk id replaces the earlier point
            collection.points.retain(|p| p.chunk.id != chunk.id);
            collection.points.push(StoredPoint {
                chunk: chunk.clone(),
                vector: embedding.values,
            });
        }

        self.persist(&data).await
    }

    async fn delete_document(&self, corpus: &str, source_file: &str) -> Result<()> {
        let mut data = self.data.write().await;
        let Some(collection) = data.collections.get_mut(&get_collection_name(corpus)) else {
            return Ok(());
        };

        let before = collection.points.len();
        collection.points.retain(|p| p.chunk.source_file != source_file);
        debug!(
            "Removed {} points of {} from {}",
            before - collection.points.len(),
            source_file,
            corpus
        );

        self.persist(&data).await
    }

    async fn search(
        &self,
        query_embedding: &Embedding,
        corpus: &str,
        limit: u64,
        source_file: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let data = self.data.read().await;
        let collection = data
            .collections
            .get(&get_collection_name(corpus))
            .ok_or_else(|| RagError::CollectionNotFound(corpus.to_string()))?;

        if query_embedding.dimension() as u64 != collection.dimension {
            return Err(RagError::VectorStore(format!(
                "query has {} dimensions, collection {} expects {}",
                query_embedding.dimension(),
                corpus,
                collection.dimension
            ))
            .into());
        }

        let mut scored: Vec<ScoredChunk> = collection
            .points
            .iter()
            .filter(|p| source_file.map_or(true, |f| p.chunk.source_file == f))
            .map(|p| ScoredChunk {
                chunk: p.chunk.clone(),
                score: cosine_similarity(&query_embedding.values, &p.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit as usize);

        Ok(scored)
    }

    async fn count(&self, corpus: &str) -> Result<u64> {
        let data = self.data.read().await;
        let collection = data
            .collections
            .get(&get_collection_name(corpus))
            .ok_or_else(|| RagError::CollectionNotFound(corpus.to_string()))?;
        Ok(collection.points.len() as u64)
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(source_file: &str, chunk_index: usize, text: &str) -> TextChunk {
        TextChunk {
            id: TextChunk::make_id(source_file, chunk_index),
            text: text.to_string(),
            token_count: 1,
            source_file: source_file.to_string(),
            page: 1,
            chunk_index,
            start_position: 0,
        }
    }

    fn embedding(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
        }
    }

    async fn seeded_store() -> LocalStore {
        let store = LocalStore::in_memory();
        store.create_collection("papers", 2).await.unwrap();
        store
            .store_chunks(
                "papers",
                &[
                    chunk("a.pdf", 0, "attention"),
                    chunk("a.pdf", 1, "convolution"),
                    chunk("b.pdf", 0, "graphs"),
                ],
                vec![
                    embedding(&[1.0, 0.0]),
                    embedding(&[0.0, 1.0]),
                    embedding(&[0.9, 0.1]),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = seeded_store().await;

        let results = store
            .search(&embedding(&[1.0, 0.0]), "papers", 2, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "a.pdf#0");
        assert_eq!(results[1].chunk.id, "b.pdf#0");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_search_respects_document_filter() {
        let store = seeded_store().await;

        let results = store
            .search(&embedding(&[1.0, 0.0]), "papers", 10, Some("b.pdf"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.chunk.source_file == "b.pdf"));
    }

    #[tokio::test]
    async fn test_query_dimension_must_match_collection() {
        let store = seeded_store().await;

        let err = store
            .search(&embedding(&[1.0]), "papers", 3, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::VectorStore(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_batches_store_nothing() {
        let store = seeded_store().await;

        let uneven = store
            .store_chunks(
                "papers",
                &[chunk("c.pdf", 0, "retrieval"), chunk("c.pdf", 1, "ranking")],
                vec![embedding(&[1.0, 0.0])],
            )
            .await;
        let wrong_size = store
            .store_chunks(
                "papers",
                &[chunk("c.pdf", 0, "retrieval"), chunk("c.pdf", 1, "ranking")],
                vec![embedding(&[1.0, 0.0]), embedding(&[1.0, 0.0, 0.0])],
            )
            .await;

        assert!(uneven.is_err());
        assert!(wrong_size.is_err());
        assert_eq!(store.count("papers").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_collection_is_reported() {
        let store = LocalStore::in_memory();

        let err = store
            .search(&embedding(&[1.0, 0.0]), "missing", 3, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::CollectionNotFound(name)) if name == "missing"
        ));
        assert!(!store.collection_exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_document_and_dimension_check() {
        let store = seeded_store().await;

        store.delete_document("papers", "a.pdf").await.unwrap();
        assert_eq!(store.count("papers").await.unwrap(), 1);

        let err = store
            .store_chunks("papers", &[chunk("c.pdf", 0, "x")], vec![embedding(&[1.0])])
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_store_persists_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("vector_store.json");

        {
            let store = LocalStore::open(&path).unwrap();
            store.create_collection("papers", 2).await.unwrap();
            store
                .store_chunks("papers", &[chunk("a.pdf", 0, "attention")], vec![embedding(&[1.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = LocalStore::open(&path).unwrap();
        assert!(reopened.collection_exists("papers").await.unwrap());
        assert_eq!(reopened.count("papers").await.unwrap(), 1);

        reopened.delete_collection("papers").await.unwrap();
        let reopened = LocalStore::open(&path).unwrap();
        assert!(!reopened.collection_exists("papers").await.unwrap());
    }
}
