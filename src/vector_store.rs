use crate::chunking::TextChunk;
use crate::error::RagError;
use crate::providers::Embedding;
use anyhow::Result;
use async_trait::async_trait;

/// A stored chunk returned by similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    /// Cosine similarity, higher is closer
    pub score: f32,
}

/// Trait for vector storage and similarity search over chunk embeddings.
///
/// A corpus maps to one collection; each point carries the full chunk as payload.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if a corpus collection exists
    async fn collection_exists(&self, corpus: &str) -> Result<bool>;

    /// Create a collection sized for `dimension`-long vectors
    async fn create_collection(&self, corpus: &str, dimension: u64) -> Result<()>;

    /// Delete a collection; deleting a missing collection is not an error
    async fn delete_collection(&self, corpus: &str) -> Result<()>;

    /// Store chunks with their embeddings, pairwise
    async fn store_chunks(
        &self,
        corpus: &str,
        chunks: &[TextChunk],
        embeddings: Vec<Embedding>,
    ) -> Result<()>;

    /// Remove every chunk of one source file from the collection
    async fn delete_document(&self, corpus: &str, source_file: &str) -> Result<()>;

    /// Search for the `limit` nearest chunks, optionally within one source file
    async fn search(
        &self,
        query_embedding: &Embedding,
        corpus: &str,
        limit: u64,
        source_file: Option<&str>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Number of chunks stored in the collection
    async fn count(&self, corpus: &str) -> Result<u64>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Generate a collection name from a corpus name
pub fn get_collection_name(corpus: &str) -> String {
    // Replace non-alphanumeric characters with underscores and convert to lowercase
    let name = corpus
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    format!("rag_{}", name)
}

/// Every chunk needs exactly one embedding
pub fn check_batch(chunks: &[TextChunk], embeddings: &[Embedding]) -> Result<(), RagError> {
    if chunks.len() != embeddings.len() {
        return Err(RagError::VectorStore(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }
    Ok(())
}

/// Cosine similarity of two vectors; zero when either has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch_rejects_length_mismatch() {
        let chunk = TextChunk {
            id: TextChunk::make_id("a.pdf", 0),
            text: "attention".to_string(),
            token_count: 1,
            source_file: "a.pdf".to_string(),
            page: 1,
            chunk_index: 0,
            start_position: 0,
        };
        let embedding = Embedding {
            values: vec![1.0, 0.0],
        };

        assert!(check_batch(&[chunk.clone()], &[embedding.clone()]).is_ok());
        assert!(matches!(
            check_batch(&[chunk.clone(), chunk], &[embedding]),
            Err(RagError::VectorStore(_))
        ));
    }

    #[test]
    fn test_collection_name_is_sanitized() {
        assert_eq!(get_collection_name("Academic Docs-2024"), "rag_academic_docs_2024");
        assert_eq!(get_collection_name("paper.pdf"), "rag_paper_pdf");
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
