use anyhow::Result;
use async_trait::async_trait;
use scholar_rag::chunking::split_document;
use scholar_rag::config::{ChunkingConfig, GraphConfig};
use scholar_rag::document::Document;
use scholar_rag::embeddings::{EmbeddingConfig, EmbeddingService};
use scholar_rag::entity_extractor::EntityExtractor;
use scholar_rag::error::RagError;
use scholar_rag::knowledge_graph::KnowledgeGraph;
use scholar_rag::local_store::LocalStore;
use scholar_rag::providers::{ChatModel, Embedder, Embedding, GenerationParams};
use scholar_rag::rag::{IngestMode, RagEngine};
use scholar_rag::vector_store::VectorStore;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIMENSION: usize = 32;

/// Hashed bag-of-words vectors
struct HashingEmbedder;

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut values = vec![0.0; DIMENSION];
                for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
                    if word.is_empty() {
                        continue;
                    }
                    let mut hasher = DefaultHasher::new();
                    word.hash(&mut hasher);
                    values[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
                }
                Embedding { values }
            })
            .collect())
    }

    fn model(&self) -> &str {
        "hashing"
    }
}

/// Answers with citation markers, or with entity JSON for extraction prompts
struct FakeChat {
    prompts: Mutex<Vec<String>>,
}

impl FakeChat {
    fn new() -> Arc<Self> {
        Arc::new(FakeChat {
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn complete(&self, prompt: &str, _params: GenerationParams) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.contains("Reply with JSON only") {
            return Ok(r#"{"keywords": ["attention", "graph"], "methods": ["Transformer"], "datasets": ["WMT"]}"#.to_string());
        }
        Ok("Transformers rely on self-attention [doc_0]. Details follow [doc_1], \
            but [doc_99] is invented."
            .to_string())
    }

    fn model(&self) -> &str {
        "fake"
    }
}

const CHUNKING: ChunkingConfig = ChunkingConfig {
    chunk_size: 200,
    chunk_overlap: 20,
};

fn transformer_paper() -> Document {
    Document::from_text(
        "transformer.txt",
        "The Transformer replaces recurrence with self-attention over token sequences.\n\n\
         Multi-head attention lets the model attend to several representation subspaces at once. \
         Positional encodings inject order information into the attention layers.\n\n\
         On the WMT translation benchmark the Transformer outperforms recurrent baselines \
         while training considerably faster on parallel hardware.",
    )
}

fn graph_paper() -> Document {
    Document::from_text(
        "graphs.txt",
        "Graph neural networks propagate messages between neighbouring nodes of a graph.\n\n\
         Each layer aggregates neighbour features and updates node states with a learned function. \
         Attention over neighbours weights the messages by relevance.\n\n\
         On citation network benchmarks graph attention networks reach strong node \
         classification accuracy with few labelled examples.",
    )
}

fn engine(store: Arc<dyn VectorStore>, chat: Arc<FakeChat>) -> RagEngine {
    let embeddings = EmbeddingService::new(
        Arc::new(HashingEmbedder),
        EmbeddingConfig {
            batch_size: 2,
            delay_between_batches: Duration::ZERO,
            max_retries: 1,
            retry_delay: Duration::ZERO,
        },
    );
    RagEngine::new(store, embeddings, chat)
        .with_chunking(CHUNKING)
        .with_retrieval_k(4)
}

#[tokio::test]
async fn ingest_produces_bounded_chunks() {
    let store = Arc::new(LocalStore::in_memory());
    let engine = engine(store.clone(), FakeChat::new());

    let reports = engine
        .ingest(
            &[transformer_paper(), graph_paper()],
            "papers",
            IngestMode::Replace,
            true,
        )
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.chunks > 1));
    let total: usize = reports.iter().map(|r| r.chunks).sum();
    assert_eq!(store.count("papers").await.unwrap(), total as u64);

    for chunk in split_document(&transformer_paper(), CHUNKING, true) {
        assert!(!chunk.text.is_empty());
        assert!(chunk.text.chars().count() <= CHUNKING.chunk_size);
    }
}

#[tokio::test]
async fn answer_cites_retrieved_sources_only() {
    let store = Arc::new(LocalStore::in_memory());
    let chat = FakeChat::new();
    let engine = engine(store, chat.clone());
    engine
        .ingest(
            &[transformer_paper(), graph_paper()],
            "papers",
            IngestMode::Replace,
            true,
        )
        .await
        .unwrap();

    let answer = engine
        .query("papers", "How does the Transformer use attention?", None)
        .await
        .unwrap();

    assert!(!answer.text.is_empty());
    assert!(!answer.sources.is_empty() && answer.sources.len() <= 4);
    assert_eq!(answer.sources[0].tag, "doc_0");

    let source_ids: Vec<&str> = answer.sources.iter().map(|s| s.chunk.id.as_str()).collect();
    assert_eq!(answer.citations.len(), 2);
    for citation in &answer.citations {
        assert!(source_ids.contains(&citation.chunk_id.as_str()));
    }
    assert_eq!(answer.unresolved_markers, vec!["doc_99".to_string()]);

    let prompts = chat.prompts.lock().unwrap();
    let prompt = prompts.last().unwrap();
    assert!(prompt.contains("[doc_0] (source: "));
    assert!(prompt.contains("How does the Transformer use attention?"));
}

#[tokio::test]
async fn document_filter_prevents_cross_document_leakage() {
    let store = Arc::new(LocalStore::in_memory());
    let engine = engine(store, FakeChat::new());
    engine
        .ingest(
            &[transformer_paper(), graph_paper()],
            "papers",
            IngestMode::Replace,
            true,
        )
        .await
        .unwrap();

    let answer = engine
        .query("papers", "Transformer attention on WMT", Some("graphs.txt"))
        .await
        .unwrap();

    assert!(!answer.sources.is_empty());
    assert!(answer
        .sources
        .iter()
        .all(|s| s.chunk.source_file == "graphs.txt"));
}

#[tokio::test]
async fn replace_and_append_modes() {
    let store = Arc::new(LocalStore::in_memory());
    let engine = engine(store.clone(), FakeChat::new());

    let first = engine
        .ingest(&[transformer_paper()], "papers", IngestMode::Replace, true)
        .await
        .unwrap();
    let graph_only = engine
        .ingest(&[graph_paper()], "papers", IngestMode::Replace, true)
        .await
        .unwrap();
    assert_eq!(store.count("papers").await.unwrap(), graph_only[0].chunks as u64);

    engine
        .ingest(&[transformer_paper()], "papers", IngestMode::Append, true)
        .await
        .unwrap();
    engine
        .ingest(&[transformer_paper()], "papers", IngestMode::Append, true)
        .await
        .unwrap();
    assert_eq!(
        store.count("papers").await.unwrap(),
        (first[0].chunks + graph_only[0].chunks) as u64
    );
}

#[tokio::test]
async fn query_errors_are_typed() {
    let store = Arc::new(LocalStore::in_memory());
    let engine = engine(store.clone(), FakeChat::new());

    let err = engine.query("papers", "   ", None).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::EmptyQuestion)));

    let err = engine.query("missing", "What?", None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::CollectionNotFound(_))
    ));

    engine
        .ingest(&[transformer_paper()], "papers", IngestMode::Replace, true)
        .await
        .unwrap();
    let err = engine
        .query("papers", "What?", Some("unknown.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::NoRelevantChunks(_))
    ));

    let err = engine
        .ingest(&[Document::from_text("empty.txt", "  ")], "papers", IngestMode::Append, true)
        .await
        .unwrap_err();
    assert!(err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<RagError>(), Some(RagError::EmptyDocument(_)))));
}

#[tokio::test]
async fn local_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vector_store.json");

    {
        let store = Arc::new(LocalStore::open(&path).unwrap());
        engine(store, FakeChat::new())
            .ingest(&[graph_paper()], "papers", IngestMode::Replace, true)
            .await
            .unwrap();
    }

    let store = Arc::new(LocalStore::open(&path).unwrap());
    let engine = engine(store, FakeChat::new());
    assert!(engine.collection_exists("papers").await.unwrap());
    let answer = engine.query("papers", "graph attention", None).await.unwrap();
    assert!(answer.sources.iter().all(|s| s.chunk.source_file == "graphs.txt"));

    engine.clear("papers").await.unwrap();
    assert!(!engine.collection_exists("papers").await.unwrap());
}

#[tokio::test]
async fn knowledge_graph_entities_are_supported_by_chunks() {
    let chat = FakeChat::new();
    let extractor = EntityExtractor::new(chat, GraphConfig::default());

    let chunks: Vec<_> = [transformer_paper(), graph_paper()]
        .iter()
        .flat_map(|d| split_document(d, CHUNKING, true))
        .collect();
    let chunk_ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

    let results = extractor.extract_from_documents(&chunks, true).await;
    let mut graph = KnowledgeGraph::new();
    graph.build_from_extraction_results(&results);

    assert_eq!(graph.document_nodes(), vec!["transformer.txt", "graphs.txt"]);
    assert_eq!(
        graph.shared_entities("transformer.txt", "graphs.txt").len(),
        4
    );

    let entities = graph.entity_nodes(None);
    assert!(!entities.is_empty());
    for entity in entities {
        let supports = &graph.node(entity).unwrap().supports;
        assert!(!supports.is_empty(), "{} has no support", entity);
        assert!(supports.iter().all(|id| chunk_ids.contains(&id.as_str())));
    }
}
